use std::fmt;
use std::time::Duration;

use tracing::{Level, event};
use uuid::Uuid;

use crate::errors::Error;

/// Why a token refresh was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    /// No token yet.
    Initial,
    /// Token inside its refresh window.
    Expiring,
    /// Server rejected the current token.
    Rejected,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshReason::Initial => write!(f, "initial"),
            RefreshReason::Expiring => write!(f, "expiring"),
            RefreshReason::Rejected => write!(f, "rejected"),
        }
    }
}

/// Correlates the start/outcome events of one refresh attempt.
#[derive(Clone, Debug)]
pub struct RefreshTelemetry {
    attempt_id: Uuid,
    principal: String,
    reason: RefreshReason,
}

impl RefreshTelemetry {
    pub fn new(principal: impl Into<String>, reason: RefreshReason) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            principal: principal.into(),
            reason,
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn reason(&self) -> RefreshReason {
        self.reason
    }

    pub fn emit_start(&self) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            principal = %self.principal,
            reason = %self.reason,
            "refresh.start"
        );
    }

    pub fn emit_success(&self, ttl: Duration, elapsed: Duration) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            principal = %self.principal,
            ttl_secs = ttl.as_secs(),
            elapsed_ms = elapsed.as_millis() as u64,
            "refresh.success"
        );
    }

    pub fn emit_failure(&self, error: &Error) {
        event!(
            Level::ERROR,
            attempt_id = %self.attempt_id,
            principal = %self.principal,
            reason = %self.reason,
            error = %error,
            "refresh.failure"
        );
    }
}
