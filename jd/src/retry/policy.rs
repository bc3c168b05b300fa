//! Retry policy configuration and backoff arithmetic

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::ErrorKind;

/// Backoff and retry budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Default retry budget for new jobs
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Retry cap for unclassified errors
    #[serde(rename = "unknown-max-retries")]
    pub unknown_max_retries: u32,

    /// Backoff base in milliseconds
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Symmetric jitter fraction in [0, 1]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            unknown_max_retries: 1,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Retries allowed for a failure kind given the job's budget
    pub fn cap_for(&self, kind: ErrorKind, max_retries: u32) -> u32 {
        match kind {
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited => max_retries,
            ErrorKind::Unknown => max_retries.min(self.unknown_max_retries),
            ErrorKind::Validation | ErrorKind::Cancelled => 0,
        }
    }

    /// `base * 2^retry_count`, clamped to the ceiling, without jitter
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = 2f64.powi(retry_count.min(63) as i32);
        let millis = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Backoff with +/- `jitter` applied
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let backoff = self.backoff(retry_count);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return backoff;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        backoff.mul_f64(factor.max(0.0))
    }
}
