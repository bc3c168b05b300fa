//! Job failure taxonomy
//!
//! Handlers return [`JobError`]; the worker classifies it into an
//! [`ErrorKind`] and hands it to the retry controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    Validation,
    Unknown,
    Cancelled,
}

impl ErrorKind {
    /// Whether failures of this kind may be retried at all
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::RateLimited | Self::Unknown)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Errors raised by job handlers and the services they call
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited on endpoint '{endpoint}'")]
    RateLimited {
        endpoint: String,
        retry_after: Option<Duration>,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{message}")]
    Unknown { message: String, trace: Option<String> },

    #[error("Cancelled")]
    Cancelled,
}

impl JobError {
    /// Shorthand for an unknown error without a trace
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
            trace: None,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Network(_) => ErrorKind::Network,
            JobError::Timeout(_) => ErrorKind::Timeout,
            JobError::RateLimited { .. } => ErrorKind::RateLimited,
            JobError::Validation(_) => ErrorKind::Validation,
            JobError::Unknown { .. } => ErrorKind::Unknown,
            JobError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Get the retry hint if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JobError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Diagnostic trace, when the handler supplied one
    pub fn trace(&self) -> Option<&str> {
        match self {
            JobError::Unknown { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Validation(e.to_string())
    }
}

/// Failure recorded on a job (`last_error`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl From<&JobError> for JobFailure {
    fn from(e: &JobError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            trace: e.trace().map(str::to_string),
        }
    }
}
