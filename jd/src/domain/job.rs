//! Job domain type and its state machine
//!
//! ```text
//! pending -> queued -> processing -> completed
//!                          |      -> failed
//!                          |      -> cancelled
//!                          +----> retrying -> queued
//! pending -> cancelled, queued -> cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::error::JobFailure;
use super::id::JobId;
use super::priority::Priority;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet visible to workers
    #[default]
    Pending,
    /// Eligible for claim
    Queued,
    /// Claimed by exactly one worker
    Processing,
    /// Transient failure, waiting for delayed re-queue
    Retrying,
    /// Handler succeeded
    Completed,
    /// Fatal error or retries exhausted
    Failed,
    /// Explicit cancel request honoured
    Cancelled,
}

impl JobStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check whether `self -> to` is an edge of the state machine
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Processing, Cancelled)
                | (Retrying, Queued)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "retrying" => Ok(Self::Retrying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Rejected state machine edge
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Resource usage snapshot reported during execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU time consumed by the handler, as reported by it
    #[serde(default)]
    pub cpu_time_ms: u64,

    /// Peak memory reported by the handler
    #[serde(default)]
    pub peak_memory_bytes: u64,

    /// Downstream calls that went through the rate limiter
    #[serde(default)]
    pub downstream_calls: u64,

    /// Downstream calls answered from the result cache
    #[serde(default)]
    pub cache_hits: u64,
}

/// An asynchronous processing request and its runtime state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier
    pub id: JobId,

    /// Handler key
    pub job_type: String,

    pub priority: Priority,

    /// Handler parameters (JSON object)
    pub payload: Value,

    pub status: JobStatus,

    /// Fraction complete in [0.0, 1.0]; monotonic within one attempt
    pub progress: f64,

    /// Current stage label set by the handler
    pub stage: Option<String>,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Retry budget
    pub max_retries: u32,

    /// Number of times the job has been claimed
    pub attempts: u32,

    /// Submission order within the process (FIFO tie-break)
    pub sequence: u64,

    /// Worker currently (or last) holding the claim
    pub worker_id: Option<String>,

    pub resource_usage: ResourceUsage,

    /// Records per second during the current attempt
    pub throughput: f64,

    pub records_processed: u64,

    pub total_records: Option<u64>,

    pub last_error: Option<JobFailure>,

    /// Handler output on completion
    pub result: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job with a generated ID
    pub fn new(job_type: impl Into<String>, payload: Value, priority: Priority) -> Self {
        let job_type = job_type.into();
        debug!(%job_type, ?priority, "Job::new: called");
        let now = Utc::now();
        Self {
            id: JobId::new(&job_type),
            job_type,
            priority,
            payload,
            status: JobStatus::Pending,
            progress: 0.0,
            stage: None,
            retry_count: 0,
            max_retries: 0,
            attempts: 0,
            sequence: 0,
            worker_id: None,
            resource_usage: ResourceUsage::default(),
            throughput: 0.0,
            records_processed: 0,
            total_records: None,
            last_error: None,
            result: None,
            created_at: now,
            submitted_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
        }
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a state machine edge, updating timestamps; returns the previous status
    pub fn transition(&mut self, to: JobStatus) -> Result<JobStatus, TransitionError> {
        let from = self.status;
        debug!(job_id = %self.id, %from, %to, "Job::transition: called");
        if !from.can_transition_to(to) {
            return Err(TransitionError {
                job_id: self.id.clone(),
                from,
                to,
            });
        }

        let now = Utc::now();
        match to {
            JobStatus::Processing => {
                self.attempts += 1;
                self.started_at = Some(now);
                self.progress = 0.0;
                self.stage = None;
                self.records_processed = 0;
                self.throughput = 0.0;
            }
            JobStatus::Retrying => {
                self.worker_id = None;
            }
            JobStatus::Completed => {
                self.progress = 1.0;
                self.completed_at = Some(now);
            }
            JobStatus::Failed => {
                self.failed_at = Some(now);
            }
            JobStatus::Cancelled => {
                self.cancelled_at = Some(now);
            }
            JobStatus::Pending | JobStatus::Queued => {}
        }

        self.status = to;
        self.updated_at = now;
        Ok(from)
    }

    /// Raise progress; lower values are ignored so progress never decreases within an attempt
    pub fn advance_progress(&mut self, progress: f64) -> bool {
        if !progress.is_finite() {
            debug!(job_id = %self.id, requested = progress, "Job::advance_progress: ignoring non-finite value");
            return false;
        }
        let progress = progress.clamp(0.0, 1.0);
        if progress < self.progress {
            debug!(job_id = %self.id, current = self.progress, requested = progress, "Job::advance_progress: ignoring regression");
            return false;
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        true
    }

    /// Raise the processed record count and recompute throughput
    pub fn advance_records(&mut self, records_processed: u64) {
        if records_processed < self.records_processed {
            return;
        }
        self.records_processed = records_processed;
        if let Some(started) = self.started_at {
            let elapsed = (Utc::now() - started).num_milliseconds().max(1) as f64 / 1000.0;
            self.throughput = records_processed as f64 / elapsed;
        }
    }
}
