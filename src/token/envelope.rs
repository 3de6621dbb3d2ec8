use std::time::{Duration, SystemTime};

use crate::errors::Error;

/// An access token plus the timestamps needed to decide when to refresh it.
#[derive(Clone, Debug)]
pub struct TokenEnvelope {
    value: String,
    issued_at: SystemTime,
    expires_at: SystemTime,
}

impl TokenEnvelope {
    /// Tokens must live at least 60 seconds so a refresh window exists.
    pub fn try_new(
        value: String,
        issued_at: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Self, Error> {
        let ttl = expires_at
            .duration_since(issued_at)
            .map_err(|_| Error::Auth("Token expires before it was issued".into()))?;
        if ttl < Duration::from_secs(60) {
            return Err(Error::Auth(format!(
                "Token lifetime of {}s is shorter than the 60s minimum",
                ttl.as_secs()
            )));
        }
        Ok(Self {
            value,
            issued_at,
            expires_at,
        })
    }

    /// Builds an envelope from an OAuth2 `expires_in` answer received at `now`.
    pub fn from_expires_in(value: String, now: SystemTime, expires_in: u64) -> Result<Self, Error> {
        Self::try_new(value, now, now + Duration::from_secs(expires_in))
    }

    /// Raw token value for the Authorization header.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Time left before expiry, `None` once expired.
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at.duration_since(now).ok()
    }

    pub fn lifetime(&self) -> Duration {
        self.expires_at
            .duration_since(self.issued_at)
            .unwrap_or_default()
    }
}
