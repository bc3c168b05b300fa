//! Orchestration-level errors

use thiserror::Error;

use crate::domain::{JobId, TransitionError};

/// Errors returned synchronously to callers of the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {0} is already in a terminal state")]
    AlreadyTerminal(JobId),

    #[error("Orchestrator already started")]
    AlreadyStarted,

    #[error("Timed out waiting for job {0}")]
    WaitTimeout(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl OrchestratorError {
    /// Whether the caller supplied something unusable
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_) | Self::AlreadyTerminal(_))
    }
}
