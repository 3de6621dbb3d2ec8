pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod generator;
pub mod record;
pub mod runner;
pub mod telemetry;
pub mod token;
pub mod types;

pub use channel::{AppendAck, CloseSummary, WriteChannel};
pub use client::{BigQueryWriteClient, WriteApi};
pub use config::{Args, Credentials, CredentialsSource, ServiceAccountKey, TableRef, WriteMode};
pub use errors::{Error, Severity};
pub use generator::RowGenerator;
pub use record::CustomerRecord;
