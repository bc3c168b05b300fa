//! Scheduler implementation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::JobStatus;
use crate::history::HistoryRecorder;
use crate::queue::{CancelOutcome, JobQueue};
use crate::state::JobCell;
use crate::worker::{AttemptOutcome, Executor};

use super::config::SchedulerConfig;

/// Statistics for the worker pool
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub abandoned: u64,
    pub panicked: u64,
    pub running: usize,
    pub peak_concurrent: usize,
}

impl SchedulerStats {
    fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Completed => self.completed += 1,
            AttemptOutcome::Retrying { .. } => self.retried += 1,
            AttemptOutcome::Failed(_) => self.failed += 1,
            AttemptOutcome::Cancelled => self.cancelled += 1,
            AttemptOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// A dispatched attempt
struct WorkerTask {
    cell: Arc<JobCell>,
    handle: JoinHandle<AttemptOutcome>,
}

/// Fixed-size worker pool pulling from one shared queue
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<JobQueue>,
    executor: Arc<Executor>,
    history: Arc<HistoryRecorder>,

    /// Concurrency limiter
    semaphore: Arc<Semaphore>,

    /// Running attempts by dispatch number; a requeued job may briefly have two
    tasks: HashMap<u64, WorkerTask>,

    stats: Arc<Mutex<SchedulerStats>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        queue: Arc<JobQueue>,
        executor: Arc<Executor>,
        history: Arc<HistoryRecorder>,
    ) -> Self {
        debug!(workers = config.workers, "Scheduler::new: called");
        Self {
            semaphore: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            queue,
            executor,
            history,
            tasks: HashMap::new(),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }

    /// Shared view of the statistics, readable while `run` owns the scheduler
    pub fn stats_handle(&self) -> Arc<Mutex<SchedulerStats>> {
        self.stats.clone()
    }

    fn with_stats<R>(&self, f: impl FnOnce(&mut SchedulerStats) -> R) -> R {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }

    /// Dispatch loop; returns after `shutdown` fires and in-flight work settles
    pub async fn run(mut self, shutdown: CancellationToken) -> SchedulerStats {
        info!(workers = self.config.workers, "Scheduler started");
        let mut dispatched: u64 = 0;

        loop {
            self.reap_completed_tasks().await;

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker_id = format!("worker-{}", dispatched + 1);
            let claimed = tokio::select! {
                _ = shutdown.cancelled() => break,
                claimed = self.queue.claim(&worker_id, self.config.claim_poll()) => claimed,
            };
            let Some(cell) = claimed else {
                debug!("run: nothing to claim");
                continue;
            };
            dispatched += 1;

            debug!(job_id = %cell.id(), %worker_id, "run: dispatching");
            let executor = self.executor.clone();
            let stats = self.stats.clone();
            let task_cell = cell.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = executor.execute(task_cell).await;
                stats.lock().unwrap_or_else(PoisonError::into_inner).record(outcome);
                outcome
            });

            self.track(dispatched, cell, handle);
        }

        self.shutdown().await;
        let stats = self.with_stats(|stats| stats.clone());
        info!(?stats, "Scheduler stopped");
        stats
    }

    fn track(&mut self, dispatch: u64, cell: Arc<JobCell>, handle: JoinHandle<AttemptOutcome>) {
        self.tasks.insert(dispatch, WorkerTask { cell, handle });
        let running = self.tasks.len();
        self.with_stats(|stats| {
            stats.dispatched += 1;
            stats.running = running;
            stats.peak_concurrent = stats.peak_concurrent.max(running);
        });
    }

    /// Reap finished worker tasks
    async fn reap_completed_tasks(&mut self) {
        let finished: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.handle.is_finished())
            .map(|(dispatch, _)| *dispatch)
            .collect();
        if !finished.is_empty() {
            debug!(count = finished.len(), "reap_completed_tasks: found finished tasks");
        }

        for dispatch in finished {
            let Some(task) = self.tasks.remove(&dispatch) else {
                continue;
            };
            let job_id = task.cell.id().clone();
            match task.handle.await {
                Ok(outcome) => {
                    debug!(%job_id, ?outcome, "reap_completed_tasks: worker finished");
                }
                Err(e) => {
                    error!(%job_id, error = %e, "Worker task panicked");
                    self.with_stats(|stats| stats.panicked += 1);
                    self.cancel_straggler(&task.cell, "worker task panicked").await;
                }
            }
        }

        let running = self.tasks.len();
        self.with_stats(|stats| stats.running = running);
    }

    /// Settle a job whose worker is gone
    async fn cancel_straggler(&self, cell: &Arc<JobCell>, reason: &str) {
        match self.queue.cancel(cell).await {
            Ok(CancelOutcome::Requested) => {
                let metadata = json!({ "reason": reason });
                if let Err(e) = cell.settle(&self.history, JobStatus::Cancelled, Some(metadata), |_| {}) {
                    debug!(job_id = %cell.id(), error = %e, "cancel_straggler: already settled");
                }
            }
            Ok(outcome) => {
                debug!(job_id = %cell.id(), ?outcome, "cancel_straggler: settled by queue");
            }
            Err(e) => {
                warn!(job_id = %cell.id(), error = %e, "Failed to cancel straggler");
            }
        }
    }

    /// Wait for in-flight workers, then abort the rest
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler with {} active workers", self.tasks.len());

        let timeout = self.config.shutdown_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        debug!(?timeout, "shutdown: waiting for workers to finish");

        while !self.tasks.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.reap_completed_tasks().await;
        }

        if self.tasks.is_empty() {
            debug!("shutdown: all workers finished gracefully");
            return;
        }

        warn!("Aborting {} remaining workers after timeout", self.tasks.len());
        let tasks: Vec<WorkerTask> = self.tasks.drain().map(|(_, task)| task).collect();
        for task in tasks {
            debug!(job_id = %task.cell.id(), "shutdown: aborting worker");
            task.handle.abort();
            let _ = task.handle.await;
            self.cancel_straggler(&task.cell, "scheduler shutdown").await;
            self.with_stats(|stats| stats.cancelled += 1);
        }
        self.with_stats(|stats| stats.running = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, ResultCache};
    use crate::domain::{Job, Priority};
    use crate::events::EventBus;
    use crate::ratelimit::{RateLimitConfig, RateLimiter};
    use crate::retry::{RetryController, RetryPolicy};
    use crate::state::JobStore;
    use crate::worker::HandlerRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        store: JobStore,
        queue: Arc<JobQueue>,
        scheduler: Scheduler,
    }

    fn harness(registry: HandlerRegistry, config: SchedulerConfig) -> Harness {
        let history = Arc::new(HistoryRecorder::new(Arc::new(EventBus::new(4096))));
        let queue = Arc::new(JobQueue::new(history.clone()));
        let executor = Arc::new(
            Executor::new(
                Arc::new(registry),
                queue.clone(),
                history.clone(),
                RetryController::new(RetryPolicy {
                    base_delay_ms: 1,
                    jitter: 0.0,
                    ..Default::default()
                }),
                Arc::new(RateLimiter::new(RateLimitConfig::default())),
                Arc::new(ResultCache::new(CacheConfig::default())),
            )
            .with_job_timeout(config.job_timeout()),
        );
        Harness {
            store: JobStore::new(),
            scheduler: Scheduler::new(config, queue.clone(), executor, history),
            queue,
        }
    }

    fn config(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            claim_poll_ms: 20,
            shutdown_timeout_secs: 1,
            ..Default::default()
        }
    }

    async fn wait_until(f: impl Fn() -> bool) {
        for _ in 0..500 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runs_all_jobs_within_worker_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        {
            let (active, peak) = (active.clone(), peak.clone());
            registry.register_fn("work", move |_, _| {
                let (active, peak) = (active.clone(), peak.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            });
        }
        let h = harness(registry, config(3));
        let cells: Vec<_> = (0..12)
            .map(|_| h.store.insert(Job::new("work", json!({}), Priority::Normal)))
            .collect();
        for cell in &cells {
            h.queue.enqueue(cell.clone()).await.unwrap();
        }

        let stats = h.scheduler.stats_handle();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.scheduler.run(shutdown.clone()));

        wait_until(|| cells.iter().all(|c| c.status() == JobStatus::Completed)).await;
        shutdown.cancel();
        let final_stats = run.await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(final_stats.completed, 12);
        assert_eq!(final_stats.dispatched, 12);
        assert!(final_stats.peak_concurrent <= 3);
        assert_eq!(stats.lock().unwrap().completed, 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_aborts_stragglers() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("hang", |_, _| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        });
        let h = harness(registry, config(1));
        let cell = h.store.insert(Job::new("hang", json!({}), Priority::Normal));
        h.queue.enqueue(cell.clone()).await.unwrap();

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(h.scheduler.run(shutdown.clone()));
        wait_until(|| cell.status() == JobStatus::Processing).await;

        shutdown.cancel();
        let stats = run.await.unwrap();
        assert_eq!(cell.status(), JobStatus::Cancelled);
        assert_eq!(stats.cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_attempts_of_one_job_are_both_tracked() {
        let mut h = harness(HandlerRegistry::new(), config(2));
        let cell = h.store.insert(Job::new("work", json!({}), Priority::Normal));
        for dispatch in 1..=2 {
            let handle = tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                AttemptOutcome::Completed
            });
            h.scheduler.track(dispatch, cell.clone(), handle);
        }

        let stats = h.scheduler.stats_handle();
        assert_eq!(h.scheduler.tasks.len(), 2);
        assert_eq!(stats.lock().unwrap().running, 2);
        assert_eq!(stats.lock().unwrap().peak_concurrent, 2);

        h.scheduler.shutdown().await;
        assert!(h.scheduler.tasks.is_empty());
        assert_eq!(stats.lock().unwrap().running, 0);
        assert_eq!(cell.status(), JobStatus::Cancelled);
    }
}
