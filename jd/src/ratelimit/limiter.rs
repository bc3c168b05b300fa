//! RateLimiter - per-endpoint token buckets shared by all workers

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::JobError;

use super::bucket::{BucketConfig, TokenBucket};

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket used for endpoints without an override
    pub default: BucketConfig,

    /// Per-endpoint overrides
    pub endpoints: HashMap<String, BucketConfig>,

    /// How long `acquire` waits for a token, in milliseconds
    #[serde(rename = "acquire-timeout-ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: BucketConfig::default(),
            endpoints: HashMap::new(),
            acquire_timeout_ms: 5_000,
        }
    }
}

impl RateLimitConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Bucket settings for an endpoint
    pub fn bucket_for(&self, endpoint: &str) -> &BucketConfig {
        self.endpoints.get(endpoint).unwrap_or(&self.default)
    }
}

/// Errors from the rate limiter
#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    #[error("No token for endpoint '{endpoint}' within {timeout:?}")]
    Timeout {
        endpoint: String,
        timeout: Duration,
        /// Time until the next token at the moment of giving up
        retry_after: Duration,
    },
}

impl From<RateLimitError> for JobError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Timeout {
                endpoint, retry_after, ..
            } => JobError::RateLimited {
                endpoint,
                retry_after: Some(retry_after),
            },
        }
    }
}

/// Per-endpoint token-bucket gate
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        debug!(?config, "RateLimiter::new: called");
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Bucket for an endpoint, created on first use
    fn bucket(&self, endpoint: &str) -> Arc<TokenBucket> {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(endpoint) {
                return bucket.clone();
            }
        }
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        buckets
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                debug!(%endpoint, "RateLimiter::bucket: creating bucket");
                Arc::new(TokenBucket::new(self.config.bucket_for(endpoint)))
            })
            .clone()
    }

    /// Take a token without waiting
    pub fn try_acquire(&self, endpoint: &str) -> bool {
        let granted = self.bucket(endpoint).try_take().is_ok();
        debug!(%endpoint, granted, "RateLimiter::try_acquire: called");
        granted
    }

    /// Wait for a token for up to `timeout`
    pub async fn acquire(&self, endpoint: &str, timeout: Duration) -> Result<(), RateLimitError> {
        debug!(%endpoint, ?timeout, "RateLimiter::acquire: called");
        let bucket = self.bucket(endpoint);
        let deadline = Instant::now() + timeout;

        loop {
            let wait = match bucket.try_take() {
                Ok(()) => {
                    debug!(%endpoint, "RateLimiter::acquire: granted");
                    return Ok(());
                }
                Err(wait) => wait,
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(%endpoint, ?timeout, "Rate limit wait timed out");
                return Err(RateLimitError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                    retry_after: wait,
                });
            }
            debug!(%endpoint, ?wait, "RateLimiter::acquire: waiting for refill");
            let wake = now.checked_add(wait).map_or(deadline, |at| at.min(deadline));
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Wait for a token using the configured timeout
    pub async fn acquire_default(&self, endpoint: &str) -> Result<(), RateLimitError> {
        self.acquire(endpoint, self.config.acquire_timeout()).await
    }

    /// Tokens currently available for an endpoint
    pub fn available(&self, endpoint: &str) -> f64 {
        self.bucket(endpoint).available()
    }
}
