//! History ledger entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::JobId;
use super::job::JobStatus;

/// Immutable record of one status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHistoryEntry {
    pub job_id: JobId,

    /// None for the creation entry
    pub from_state: Option<JobStatus>,

    pub to_state: JobStatus,

    pub timestamp: DateTime<Utc>,

    /// Error or metrics payload attached to the transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl JobHistoryEntry {
    pub fn new(job_id: JobId, from_state: Option<JobStatus>, to_state: JobStatus, metadata: Option<Value>) -> Self {
        Self {
            job_id,
            from_state,
            to_state,
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// True when this entry is the `from -> to` edge
    pub fn is_edge(&self, from: JobStatus, to: JobStatus) -> bool {
        self.from_state == Some(from) && self.to_state == to
    }
}

/// Lightweight progress snapshot; not a state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub attempt: u32,
    pub progress: f64,
    pub stage: Option<String>,
    pub records_processed: u64,
    pub timestamp: DateTime<Utc>,
}
