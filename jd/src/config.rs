//! JobDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::events::DEFAULT_CHANNEL_CAPACITY;
use crate::ratelimit::{BucketConfig, RateLimitConfig};
use crate::retry::RetryPolicy;
use crate::scheduler::SchedulerConfig;

/// Main JobDaemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool settings
    pub scheduler: SchedulerConfig,

    /// Retry budget and backoff
    pub retry: RetryPolicy,

    /// Outbound rate limits
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,

    /// Result cache settings
    pub cache: CacheConfig,

    /// Event bus and durable event log
    pub history: HistoryConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            return Err(eyre::eyre!("scheduler.workers must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(eyre::eyre!("retry.jitter must be within [0, 1], got {}", self.retry.jitter));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(eyre::eyre!(
                "retry.base-delay-ms ({}) exceeds retry.max-delay-ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            ));
        }
        validate_bucket("rate-limit.default", &self.rate_limit.default)?;
        for (endpoint, bucket) in &self.rate_limit.endpoints {
            validate_bucket(&format!("rate-limit.endpoints.{}", endpoint), bucket)?;
        }
        if self.history.event_capacity == 0 {
            return Err(eyre::eyre!("history.event-capacity must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .jobdaemon.yml
        let local_config = PathBuf::from(".jobdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/jobdaemon/jobdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("jobdaemon").join("jobdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn validate_bucket(name: &str, bucket: &BucketConfig) -> Result<()> {
    if bucket.capacity == 0 {
        return Err(eyre::eyre!("{}.capacity must be at least 1", name));
    }
    if !bucket.refill_per_sec.is_finite() || bucket.refill_per_sec <= 0.0 {
        return Err(eyre::eyre!("{}.refill-per-sec must be positive and finite, got {}", name, bucket.refill_per_sec));
    }
    Ok(())
}

/// Event bus and durable event log configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Directory for per-job JSONL event logs (disabled when unset)
    #[serde(rename = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// Broadcast channel capacity
    #[serde(rename = "event-capacity")]
    pub event_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
