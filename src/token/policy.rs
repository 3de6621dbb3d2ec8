use std::time::{Duration, SystemTime};

use crate::errors::Error;

use super::TokenEnvelope;

/// When to refresh a token ahead of its expiry.
#[derive(Clone, Debug)]
pub struct RefreshPolicy {
    /// Refresh once the remaining lifetime drops to this.
    pub threshold: Duration,
    /// Tolerated difference between our clock and the issuer's.
    pub max_skew: Duration,
}

impl RefreshPolicy {
    pub fn new(threshold: Duration, max_skew: Duration) -> Result<Self, Error> {
        if threshold.is_zero() {
            return Err(Error::Config("Refresh threshold must be > 0".into()));
        }
        if max_skew >= threshold {
            return Err(Error::Config(
                "Clock skew must be lower than the refresh threshold".into(),
            ));
        }
        Ok(Self {
            threshold,
            max_skew,
        })
    }

    pub fn from_ttl(ttl: Duration, max_skew: Duration) -> Result<Self, Error> {
        if ttl < Duration::from_secs(60) {
            return Err(Error::Config("TTL must be ≥ 60 seconds".into()));
        }
        Self::new(Self::derive_threshold(ttl), max_skew)
    }

    /// The lesser of 20% of the TTL and two minutes.
    pub fn derive_threshold(ttl: Duration) -> Duration {
        let percent_window = ttl.mul_f64(0.2);
        let hard_cap = Duration::from_secs(120);
        std::cmp::min(percent_window, hard_cap)
    }

    pub fn should_refresh(&self, envelope: &TokenEnvelope, now: SystemTime) -> bool {
        match envelope.remaining(now + self.max_skew) {
            Some(remaining) => remaining <= self.threshold,
            None => true,
        }
    }
}

impl Default for RefreshPolicy {
    /// Sized for Google's one-hour access tokens.
    fn default() -> Self {
        Self {
            threshold: Self::derive_threshold(Duration::from_secs(3600)),
            max_skew: Duration::from_secs(10),
        }
    }
}
