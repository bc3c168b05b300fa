//! Event types for job activity streaming
//!
//! These events represent all observable job activity:
//! - Submission
//! - Status transitions (mirrors the history ledger)
//! - Progress snapshots
//! - Retry scheduling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ErrorKind, JobId, JobStatus, Priority};

/// Core event enum - the vocabulary of job activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// A job passed validation and was created
    Submitted {
        job_id: JobId,
        job_type: String,
        priority: Priority,
    },
    /// A job moved along a state machine edge
    StatusChanged {
        job_id: JobId,
        from: Option<JobStatus>,
        to: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// A handler reported progress
    Progress {
        job_id: JobId,
        attempt: u32,
        progress: f64,
        stage: Option<String>,
        records_processed: u64,
    },
    /// A failed attempt was scheduled for another try
    RetryScheduled {
        job_id: JobId,
        retry_count: u32,
        delay_ms: u64,
        error_kind: ErrorKind,
    },
}

impl JobEvent {
    /// Get the job ID for this event
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Submitted { job_id, .. }
            | JobEvent::StatusChanged { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::RetryScheduled { job_id, .. } => job_id,
        }
    }

    /// Get a short type name for the event
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Submitted { .. } => "Submitted",
            JobEvent::StatusChanged { .. } => "StatusChanged",
            JobEvent::Progress { .. } => "Progress",
            JobEvent::RetryScheduled { .. } => "RetryScheduled",
        }
    }

    /// True for a transition into a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::StatusChanged { to, .. } if to.is_terminal())
    }
}

/// Event with timestamp for log persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: JobEvent,
}

impl EventLogEntry {
    pub fn new(event: JobEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
