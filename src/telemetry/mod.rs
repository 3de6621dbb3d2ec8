pub mod refresh;

pub use refresh::{RefreshReason, RefreshTelemetry};
