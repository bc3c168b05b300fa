//! JobQueue implementation

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{Job, JobStatus, TransitionError};
use crate::history::HistoryRecorder;
use crate::state::JobCell;

use super::entry::{CancelOutcome, DelayedEntry, QueueState, QueueStats, ReadyEntry};

/// Visibility horizon for delays too large to add to an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Internal state protected by mutex
struct QueueInner {
    /// Jobs eligible for claim, by priority then submission order
    ready: BinaryHeap<ReadyEntry>,

    /// Retrying jobs, earliest visibility first
    delayed: BinaryHeap<DelayedEntry>,

    stats: QueueStats,
}

impl QueueInner {
    fn depth(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn track_peak(&mut self) {
        self.stats.peak_depth = self.stats.peak_depth.max(self.depth());
    }
}

/// Priority-ordered, exclusive-claim queue with delayed visibility for retries
///
/// Every status change of a waiting job happens under the queue mutex, so a
/// job is claimed by at most one worker.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    history: Arc<HistoryRecorder>,
}

impl JobQueue {
    pub fn new(history: Arc<HistoryRecorder>) -> Self {
        debug!("JobQueue::new: called");
        Self {
            inner: Mutex::new(QueueInner {
                ready: BinaryHeap::new(),
                delayed: BinaryHeap::new(),
                stats: QueueStats::default(),
            }),
            notify: Notify::new(),
            history,
        }
    }

    /// Move a pending job to queued and make it claimable
    pub async fn enqueue(&self, cell: Arc<JobCell>) -> Result<(), TransitionError> {
        debug!(job_id = %cell.id(), "JobQueue::enqueue: called");
        let mut inner = self.inner.lock().await;

        cell.transition(&self.history, JobStatus::Queued, None)?;
        inner.ready.push(ReadyEntry::new(cell));
        inner.stats.total_enqueued += 1;
        inner.track_peak();
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    /// Promote retrying jobs whose backoff has elapsed
    fn promote_due(&self, inner: &mut QueueInner, now: Instant) {
        while inner.delayed.peek().is_some_and(|d| d.visible_at <= now) {
            let Some(entry) = inner.delayed.pop() else {
                break;
            };
            debug!(job_id = %entry.cell.id(), "JobQueue::promote_due: backoff elapsed");
            match entry.cell.transition(&self.history, JobStatus::Queued, None) {
                Ok(_) => inner.ready.push(ReadyEntry::new(entry.cell)),
                Err(e) => warn!(error = %e, "Dropping delayed job that left retrying"),
            }
        }
    }

    /// Claim the head-of-line job for `worker_id`
    ///
    /// Suspends until a job is enqueued or becomes visible, or `timeout`
    /// elapses (returns None). Dropping the future leaves the queue untouched.
    pub async fn claim(&self, worker_id: &str, timeout: Duration) -> Option<Arc<JobCell>> {
        debug!(%worker_id, ?timeout, "JobQueue::claim: called");
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before looking so an enqueue in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_visible = {
                let mut inner = self.inner.lock().await;
                self.promote_due(&mut inner, Instant::now());

                while let Some(entry) = inner.ready.pop() {
                    let worker = worker_id.to_string();
                    match entry
                        .cell
                        .transition_with(&self.history, JobStatus::Processing, None, |job: &mut Job| {
                            job.worker_id = Some(worker)
                        }) {
                        Ok(_) => {
                            inner.stats.total_claimed += 1;
                            debug!(%worker_id, job_id = %entry.cell.id(), "JobQueue::claim: claimed");
                            return Some(entry.cell);
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping queued job that left queued");
                        }
                    }
                }

                inner.delayed.peek().map(|d| d.visible_at)
            };

            if Instant::now() >= deadline {
                debug!(%worker_id, "JobQueue::claim: timed out");
                return None;
            }

            let wake_at = next_visible.map_or(deadline, |v| v.min(deadline));
            tokio::select! {
                _ = &mut notified => {
                    debug!(%worker_id, "JobQueue::claim: woken");
                }
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Move a processing job to retrying; it becomes claimable after `delay`
    ///
    /// A pending cancel request wins and the job ends cancelled instead.
    /// Returns the status actually reached.
    pub async fn requeue(
        &self,
        cell: &Arc<JobCell>,
        delay: Duration,
        metadata: Option<Value>,
        f: impl FnOnce(&mut Job),
    ) -> Result<JobStatus, TransitionError> {
        debug!(job_id = %cell.id(), ?delay, "JobQueue::requeue: called");
        let mut inner = self.inner.lock().await;

        let reached = cell.settle(&self.history, JobStatus::Retrying, metadata, f)?;
        if reached == JobStatus::Retrying {
            let now = Instant::now();
            inner.delayed.push(DelayedEntry {
                cell: cell.clone(),
                visible_at: now.checked_add(delay).unwrap_or(now + FAR_FUTURE),
                sequence: cell.read(|job| job.sequence),
            });
            inner.stats.total_requeued += 1;
            inner.track_peak();
        }
        drop(inner);

        // Wake a claimer so it re-arms its timer for the new visibility time
        self.notify.notify_one();
        Ok(reached)
    }

    /// Cancel a job from the queue's point of view
    pub async fn cancel(&self, cell: &Arc<JobCell>) -> Result<CancelOutcome, TransitionError> {
        debug!(job_id = %cell.id(), "JobQueue::cancel: called");
        let mut inner = self.inner.lock().await;
        let reason = Some(json!({ "reason": "cancel requested" }));

        let outcome = match cell.status() {
            JobStatus::Pending => {
                cell.transition(&self.history, JobStatus::Cancelled, reason)?;
                CancelOutcome::Cancelled
            }
            JobStatus::Queued => {
                inner.ready.retain(|e| e.cell.id() != cell.id());
                cell.transition(&self.history, JobStatus::Cancelled, reason)?;
                CancelOutcome::Cancelled
            }
            JobStatus::Retrying => {
                // retrying has no direct cancel edge
                inner.delayed.retain(|e| e.cell.id() != cell.id());
                cell.transition(&self.history, JobStatus::Queued, None)?;
                cell.transition(&self.history, JobStatus::Cancelled, reason)?;
                CancelOutcome::Cancelled
            }
            JobStatus::Processing => {
                if cell.request_cancel() {
                    CancelOutcome::Requested
                } else {
                    CancelOutcome::AlreadyTerminal
                }
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => CancelOutcome::AlreadyTerminal,
        };

        if outcome == CancelOutcome::Cancelled {
            inner.stats.total_cancelled += 1;
        }
        debug!(job_id = %cell.id(), ?outcome, "JobQueue::cancel: done");
        Ok(outcome)
    }

    /// Number of waiting jobs (ready + delayed)
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.depth()
    }

    /// Get current queue state
    pub async fn state(&self) -> QueueState {
        debug!("JobQueue::state: called");
        let inner = self.inner.lock().await;
        QueueState {
            ready: inner.ready.len(),
            delayed: inner.delayed.len(),
            stats: inner.stats.clone(),
        }
    }

    /// Get the queue statistics
    pub async fn stats(&self) -> QueueStats {
        self.inner.lock().await.stats.clone()
    }
}
