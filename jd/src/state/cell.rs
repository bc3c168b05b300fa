//! JobCell - one job plus its cancellation flag
//!
//! Every status change is applied and appended to history while holding the
//! cell's write lock, which keeps each job's history strictly ordered.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{Job, JobError, JobId, JobStatus, ProgressEvent, TransitionError};
use crate::history::HistoryRecorder;

/// Progress update reported by a running handler
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub progress: Option<f64>,
    pub stage: Option<String>,
    pub records_processed: Option<u64>,
}

/// Shared, lock-protected job state
#[derive(Debug)]
pub struct JobCell {
    id: JobId,
    job: RwLock<Job>,
    cancel: CancellationToken,
}

impl JobCell {
    pub fn new(job: Job) -> Self {
        Self {
            id: job.id.clone(),
            job: RwLock::new(job),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Job> {
        self.job.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Job> {
        self.job.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current job state
    pub fn snapshot(&self) -> Job {
        self.read_guard().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.read_guard().status
    }

    /// Run a read-only closure against the job
    pub fn read<R>(&self, f: impl FnOnce(&Job) -> R) -> R {
        f(&self.read_guard())
    }

    /// Mutate fields that are not part of the state machine
    pub fn modify<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        let mut job = self.write_guard();
        let result = f(&mut job);
        job.updated_at = Utc::now();
        result
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Apply a transition and record it
    pub fn transition(
        &self,
        history: &HistoryRecorder,
        to: JobStatus,
        metadata: Option<Value>,
    ) -> Result<JobStatus, TransitionError> {
        self.transition_with(history, to, metadata, |_| {})
    }

    /// Apply a transition, then `f`, and record it; returns the previous status
    pub fn transition_with(
        &self,
        history: &HistoryRecorder,
        to: JobStatus,
        metadata: Option<Value>,
        f: impl FnOnce(&mut Job),
    ) -> Result<JobStatus, TransitionError> {
        let mut job = self.write_guard();
        let from = job.transition(to)?;
        f(&mut job);
        history.record(&self.id, Some(from), to, metadata);
        Ok(from)
    }

    /// Move a processing job to its outcome; a pending cancel request wins
    ///
    /// Returns the status actually reached.
    pub fn settle(
        &self,
        history: &HistoryRecorder,
        to: JobStatus,
        metadata: Option<Value>,
        f: impl FnOnce(&mut Job),
    ) -> Result<JobStatus, TransitionError> {
        let mut job = self.write_guard();
        if self.cancel.is_cancelled() && to != JobStatus::Cancelled {
            debug!(job_id = %self.id, requested = %to, "JobCell::settle: cancel requested, discarding outcome");
            let from = job.transition(JobStatus::Cancelled)?;
            history.record(
                &self.id,
                Some(from),
                JobStatus::Cancelled,
                Some(json!({ "reason": "cancel requested", "discarded": to })),
            );
            return Ok(JobStatus::Cancelled);
        }
        let from = job.transition(to)?;
        f(&mut job);
        history.record(&self.id, Some(from), to, metadata);
        Ok(to)
    }

    /// Raise the cancel flag if the job is processing
    ///
    /// Taken under the write lock so it is ordered against `settle` and
    /// progress reports.
    pub fn request_cancel(&self) -> bool {
        let job = self.write_guard();
        if job.status != JobStatus::Processing {
            return false;
        }
        debug!(job_id = %self.id, "JobCell::request_cancel: raising flag");
        self.cancel.cancel();
        true
    }

    /// Apply a progress report and record a snapshot
    ///
    /// Fails with `Cancelled` once the flag is raised or the job left processing,
    /// in which case nothing is recorded.
    pub fn report_progress(&self, history: &HistoryRecorder, update: ProgressUpdate) -> Result<(), JobError> {
        let mut job = self.write_guard();
        if self.cancel.is_cancelled() || job.status != JobStatus::Processing {
            return Err(JobError::Cancelled);
        }
        if let Some(progress) = update.progress {
            job.advance_progress(progress);
        }
        if let Some(records) = update.records_processed {
            job.advance_records(records);
            if update.progress.is_none()
                && let Some(total) = job.total_records.filter(|t| *t > 0)
            {
                job.advance_progress(records as f64 / total as f64);
            }
        }
        if update.stage.is_some() {
            job.stage = update.stage;
        }
        job.updated_at = Utc::now();

        history.record_progress(ProgressEvent {
            job_id: self.id.clone(),
            attempt: job.attempts,
            progress: job.progress,
            stage: job.stage.clone(),
            records_processed: job.records_processed,
            timestamp: job.updated_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::events::EventBus;
    use std::sync::Arc;

    fn setup() -> (JobCell, HistoryRecorder) {
        let job = Job::new("ingest", serde_json::json!({}), Priority::Normal).with_max_retries(3);
        (JobCell::new(job), HistoryRecorder::new(Arc::new(EventBus::new(64))))
    }

    fn processing(cell: &JobCell, history: &HistoryRecorder) {
        cell.transition(history, JobStatus::Queued, None).unwrap();
        cell.transition(history, JobStatus::Processing, None).unwrap();
    }

    #[test]
    fn test_transition_records_history() {
        let (cell, history) = setup();
        processing(&cell, &history);
        let entries = history.history(cell.id()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].is_edge(JobStatus::Queued, JobStatus::Processing));
    }

    #[test]
    fn test_rejected_transition_records_nothing() {
        let (cell, history) = setup();
        assert!(cell.transition(&history, JobStatus::Completed, None).is_err());
        assert!(history.history(cell.id()).is_none());
        assert_eq!(cell.status(), JobStatus::Pending);
    }

    #[test]
    fn test_settle_prefers_cancel() {
        let (cell, history) = setup();
        processing(&cell, &history);
        assert!(cell.request_cancel());

        let reached = cell
            .settle(&history, JobStatus::Completed, None, |job| job.result = Some(serde_json::json!(1)))
            .unwrap();
        assert_eq!(reached, JobStatus::Cancelled);
        assert!(cell.snapshot().result.is_none());
    }

    #[test]
    fn test_request_cancel_only_while_processing() {
        let (cell, history) = setup();
        assert!(!cell.request_cancel());
        processing(&cell, &history);
        assert!(cell.request_cancel());
        assert!(cell.is_cancel_requested());
    }

    #[test]
    fn test_progress_stops_after_cancel() {
        let (cell, history) = setup();
        processing(&cell, &history);
        cell.report_progress(
            &history,
            ProgressUpdate {
                progress: Some(0.3),
                ..Default::default()
            },
        )
        .unwrap();
        cell.request_cancel();
        let err = cell
            .report_progress(
                &history,
                ProgressUpdate {
                    progress: Some(0.6),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert_eq!(history.progress_events(cell.id()).unwrap().len(), 1);
        assert_eq!(cell.snapshot().progress, 0.3);
    }

    #[test]
    fn test_records_drive_progress_when_total_known() {
        let (cell, history) = setup();
        processing(&cell, &history);
        cell.modify(|job| job.total_records = Some(200));
        cell.report_progress(
            &history,
            ProgressUpdate {
                records_processed: Some(50),
                ..Default::default()
            },
        )
        .unwrap();
        let job = cell.snapshot();
        assert_eq!(job.records_processed, 50);
        assert_eq!(job.progress, 0.25);
    }

    #[test]
    fn test_nan_progress_never_lowers_reads() {
        let (cell, history) = setup();
        processing(&cell, &history);
        let mut reads = Vec::new();
        for progress in [0.9, f64::NAN, 0.1] {
            cell.report_progress(
                &history,
                ProgressUpdate {
                    progress: Some(progress),
                    ..Default::default()
                },
            )
            .unwrap();
            reads.push(cell.snapshot().progress);
        }
        assert_eq!(reads, vec![0.9, 0.9, 0.9]);
        let recorded: Vec<f64> = history
            .progress_events(cell.id())
            .unwrap()
            .iter()
            .map(|e| e.progress)
            .collect();
        assert!(recorded.iter().all(|p| p.is_finite()));
    }
}
