//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// How long one claim waits before re-checking shutdown, in milliseconds
    #[serde(rename = "claim-poll-ms")]
    pub claim_poll_ms: u64,

    /// Per-attempt execution limit in seconds (0 disables)
    #[serde(rename = "job-timeout-secs")]
    pub job_timeout_secs: u64,

    /// Grace period for in-flight workers on shutdown, in seconds
    #[serde(rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            claim_poll_ms: 1_000,
            job_timeout_secs: 300,
            shutdown_timeout_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn claim_poll(&self) -> Duration {
        Duration::from_millis(self.claim_poll_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
