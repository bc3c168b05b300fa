//! HistoryRecorder - per-job append-only ledgers
//!
//! The job index sits behind a read-mostly lock; each job's ledger has its own
//! mutex, so writers for different jobs never contend on a history-wide lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::domain::{JobHistoryEntry, JobId, JobStatus, ProgressEvent};
use crate::events::EventBus;

#[derive(Debug, Default)]
struct Ledger {
    transitions: Vec<JobHistoryEntry>,
    progress: Vec<ProgressEvent>,
}

/// Append-only ledger of every job transition and progress report
pub struct HistoryRecorder {
    ledgers: RwLock<HashMap<JobId, Arc<Mutex<Ledger>>>>,
    events: Arc<EventBus>,
}

impl HistoryRecorder {
    pub fn new(events: Arc<EventBus>) -> Self {
        debug!("HistoryRecorder::new: called");
        Self {
            ledgers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Event bus every entry is mirrored onto
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn existing(&self, job_id: &JobId) -> Option<Arc<Mutex<Ledger>>> {
        let ledgers = self.ledgers.read().unwrap_or_else(PoisonError::into_inner);
        ledgers.get(job_id).cloned()
    }

    fn ledger(&self, job_id: &JobId) -> Arc<Mutex<Ledger>> {
        if let Some(ledger) = self.existing(job_id) {
            return ledger;
        }
        let mut ledgers = self.ledgers.write().unwrap_or_else(PoisonError::into_inner);
        ledgers.entry(job_id.clone()).or_default().clone()
    }

    /// Append one transition entry and publish it
    pub fn record(
        &self,
        job_id: &JobId,
        from: Option<JobStatus>,
        to: JobStatus,
        metadata: Option<Value>,
    ) -> JobHistoryEntry {
        debug!(%job_id, ?from, %to, "HistoryRecorder::record: called");
        let entry = JobHistoryEntry::new(job_id.clone(), from, to, metadata);

        let ledger = self.ledger(job_id);
        let mut ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.transitions.push(entry.clone());
        // Published under the ledger lock so bus order matches ledger order
        self.events
            .emitter_for(job_id.clone())
            .status_changed(from, to, entry.metadata.clone());

        entry
    }

    /// Append a progress snapshot and publish it
    pub fn record_progress(&self, event: ProgressEvent) {
        debug!(job_id = %event.job_id, progress = event.progress, "HistoryRecorder::record_progress: called");
        let ledger = self.ledger(&event.job_id);
        let mut ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        self.events.emitter_for(event.job_id.clone()).progress(
            event.attempt,
            event.progress,
            event.stage.clone(),
            event.records_processed,
        );
        ledger.progress.push(event);
    }

    /// Ordered transitions for a job, None if it was never recorded
    pub fn history(&self, job_id: &JobId) -> Option<Vec<JobHistoryEntry>> {
        debug!(%job_id, "HistoryRecorder::history: called");
        let ledger = self.existing(job_id)?;
        let ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        Some(ledger.transitions.clone())
    }

    /// Ordered progress snapshots for a job
    pub fn progress_events(&self, job_id: &JobId) -> Option<Vec<ProgressEvent>> {
        debug!(%job_id, "HistoryRecorder::progress_events: called");
        let ledger = self.existing(job_id)?;
        let ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        Some(ledger.progress.clone())
    }

    /// Number of jobs with a ledger
    pub fn job_count(&self) -> usize {
        self.ledgers.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::JobEvent;
    use chrono::Utc;

    fn recorder() -> HistoryRecorder {
        HistoryRecorder::new(Arc::new(EventBus::new(256)))
    }

    #[test]
    fn test_record_appends_in_order() {
        let history = recorder();
        let id = JobId::from("job-a");

        history.record(&id, None, JobStatus::Pending, None);
        history.record(&id, Some(JobStatus::Pending), JobStatus::Queued, None);
        history.record(&id, Some(JobStatus::Queued), JobStatus::Processing, None);

        let entries = history.history(&id).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].from_state, None);
        assert!(entries[1].is_edge(JobStatus::Pending, JobStatus::Queued));
        assert!(entries[2].is_edge(JobStatus::Queued, JobStatus::Processing));
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_unknown_job_has_no_history() {
        let history = recorder();
        assert!(history.history(&JobId::from("missing")).is_none());
        assert!(history.progress_events(&JobId::from("missing")).is_none());
        assert_eq!(history.job_count(), 0);
    }

    #[test]
    fn test_progress_kept_apart_from_transitions() {
        let history = recorder();
        let id = JobId::from("job-p");
        history.record(&id, None, JobStatus::Pending, None);
        history.record_progress(ProgressEvent {
            job_id: id.clone(),
            attempt: 1,
            progress: 0.5,
            stage: Some("load".to_string()),
            records_processed: 50,
            timestamp: Utc::now(),
        });

        assert_eq!(history.history(&id).unwrap().len(), 1);
        let progress = history.progress_events(&id).unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].stage.as_deref(), Some("load"));
    }

    #[tokio::test]
    async fn test_entries_are_published() {
        let history = recorder();
        let mut rx = history.events().subscribe();
        let id = JobId::from("job-e");

        history.record(&id, Some(JobStatus::Processing), JobStatus::Failed, Some(serde_json::json!({"kind": "validation"})));

        match rx.recv().await.unwrap() {
            JobEvent::StatusChanged { to, metadata, .. } => {
                assert_eq!(to, JobStatus::Failed);
                assert_eq!(metadata.unwrap()["kind"], "validation");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_on_distinct_jobs() {
        let history = Arc::new(recorder());
        let mut handles = Vec::new();
        for n in 0..16 {
            let history = history.clone();
            handles.push(tokio::spawn(async move {
                let id = JobId::from(format!("job-{}", n));
                for _ in 0..50 {
                    history.record(&id, Some(JobStatus::Processing), JobStatus::Retrying, None);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(history.job_count(), 16);
        for n in 0..16 {
            let id = JobId::from(format!("job-{}", n));
            assert_eq!(history.history(&id).unwrap().len(), 50);
        }
    }
}
