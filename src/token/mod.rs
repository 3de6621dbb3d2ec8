mod authenticator;
pub mod crypto;
mod envelope;
mod policy;

pub use authenticator::Authenticator;
pub use envelope::TokenEnvelope;
pub use policy::RefreshPolicy;
