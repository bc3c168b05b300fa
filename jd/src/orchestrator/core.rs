//! Orchestrator - submission gateway and lifecycle owner
//!
//! Owns every shared service (event bus, history, store, queue, rate limiter,
//! result cache) and the background tasks that drive them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ResultCache};
use crate::config::Config;
use crate::domain::{Job, JobHistoryEntry, JobId, JobStatus, Priority, ProgressEvent};
use crate::events::{EventBus, JobEvent, spawn_event_logger};
use crate::history::HistoryRecorder;
use crate::queue::{CancelOutcome, JobQueue, QueueState};
use crate::ratelimit::RateLimiter;
use crate::retry::RetryController;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::state::{JobMetrics, JobStore};
use crate::worker::{Executor, HandlerRegistry};

use super::error::OrchestratorError;

/// A submission as read from a batch file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default = "empty_payload")]
    pub payload: Value,

    #[serde(default)]
    pub priority: Priority,

    /// Overrides the configured retry budget
    #[serde(default, rename = "max-retries", skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

fn empty_payload() -> Value {
    json!({})
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>, payload: Value, priority: Priority) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority,
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Background tasks spawned by `start`
struct Running {
    scheduler: JoinHandle<SchedulerStats>,
    scheduler_stats: Arc<Mutex<SchedulerStats>>,
    sweeper: JoinHandle<()>,
    /// Stopped after the scheduler so final transitions reach the log
    logger: Option<(JoinHandle<()>, CancellationToken)>,
}

enum Lifecycle {
    Idle,
    Running(Running),
    Stopped(SchedulerStats),
}

/// Entry point for submitting and observing jobs
pub struct Orchestrator {
    config: Config,
    registry: Arc<HandlerRegistry>,
    events: Arc<EventBus>,
    history: Arc<HistoryRecorder>,
    store: JobStore,
    queue: Arc<JobQueue>,
    cache: Arc<ResultCache>,
    executor: Arc<Executor>,
    shutdown: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl Orchestrator {
    /// Build every service from configuration; nothing runs until `start`
    pub fn new(config: Config, registry: HandlerRegistry) -> Self {
        debug!(handlers = registry.len(), "Orchestrator::new: called");
        let registry = Arc::new(registry);
        let events = Arc::new(EventBus::new(config.history.event_capacity));
        let history = Arc::new(HistoryRecorder::new(events.clone()));
        let queue = Arc::new(JobQueue::new(history.clone()));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let executor = Arc::new(
            Executor::new(
                registry.clone(),
                queue.clone(),
                history.clone(),
                RetryController::new(config.retry.clone()),
                limiter,
                cache.clone(),
            )
            .with_job_timeout(config.scheduler.job_timeout()),
        );

        Self {
            config,
            registry,
            events,
            history,
            store: JobStore::new(),
            queue,
            cache,
            executor,
            shutdown: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Spawn the scheduler, the cache sweeper and (if configured) the event logger
    pub fn start(&self) -> Result<(), OrchestratorError> {
        debug!("Orchestrator::start: called");
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(OrchestratorError::AlreadyStarted);
        }

        let logger = match &self.config.history.log_dir {
            Some(dir) => {
                let token = CancellationToken::new();
                match spawn_event_logger(&self.events, dir, token.clone()) {
                    Ok(handle) => Some((handle, token)),
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Event log disabled");
                        None
                    }
                }
            }
            None => None,
        };

        let scheduler = Scheduler::new(
            self.config.scheduler.clone(),
            self.queue.clone(),
            self.executor.clone(),
            self.history.clone(),
        );
        let scheduler_stats = scheduler.stats_handle();
        let scheduler = tokio::spawn(scheduler.run(self.shutdown.clone()));
        let sweeper = self.cache.spawn_sweeper(self.shutdown.clone());

        *lifecycle = Lifecycle::Running(Running {
            scheduler,
            scheduler_stats,
            sweeper,
            logger,
        });
        info!(workers = self.config.scheduler.workers, "Orchestrator started");
        Ok(())
    }

    /// Stop accepting claims, drain in-flight work and stop background tasks
    ///
    /// Returns the final scheduler statistics. Calling it twice is harmless.
    pub async fn shutdown(&self) -> SchedulerStats {
        debug!("Orchestrator::shutdown: called");
        self.shutdown.cancel();

        let running = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped(SchedulerStats::default())) {
                Lifecycle::Running(running) => running,
                Lifecycle::Stopped(stats) => {
                    *lifecycle = Lifecycle::Stopped(stats.clone());
                    return stats;
                }
                Lifecycle::Idle => return SchedulerStats::default(),
            }
        };

        let stats = match running.scheduler.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Scheduler task failed");
                running
                    .scheduler_stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            }
        };
        let _ = running.sweeper.await;
        if let Some((logger, token)) = running.logger {
            token.cancel();
            let _ = logger.await;
        }

        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = Lifecycle::Stopped(stats.clone());
        info!("Orchestrator stopped");
        stats
    }

    /// Submit a job with the configured retry budget
    pub async fn submit(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        priority: Priority,
    ) -> Result<JobId, OrchestratorError> {
        self.submit_request(JobRequest::new(job_type, payload, priority)).await
    }

    /// Validate, create and enqueue a job
    pub async fn submit_request(&self, request: JobRequest) -> Result<JobId, OrchestratorError> {
        debug!(job_type = %request.job_type, priority = %request.priority, "Orchestrator::submit_request: called");
        let Some(handler) = self.registry.get(&request.job_type) else {
            return Err(OrchestratorError::Validation(format!(
                "Unknown job type '{}'",
                request.job_type
            )));
        };
        if !request.payload.is_object() {
            return Err(OrchestratorError::Validation("Payload must be a JSON object".to_string()));
        }
        handler
            .validate(&request.payload)
            .map_err(OrchestratorError::Validation)?;

        let max_retries = request.max_retries.unwrap_or(self.config.retry.max_retries);
        let job = Job::new(&request.job_type, request.payload, request.priority).with_max_retries(max_retries);
        let cell = self.store.insert(job);
        let job_id = cell.id().clone();

        self.events
            .emitter_for(job_id.clone())
            .submitted(&request.job_type, request.priority);
        self.history.record(
            &job_id,
            None,
            JobStatus::Pending,
            Some(json!({ "job_type": request.job_type, "priority": request.priority })),
        );
        self.queue.enqueue(cell).await?;

        info!(%job_id, job_type = %request.job_type, "Job submitted");
        Ok(job_id)
    }

    /// Snapshot of a job
    pub fn status(&self, job_id: &JobId) -> Result<Job, OrchestratorError> {
        self.store
            .snapshot(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))
    }

    /// Cancel a job; processing jobs are cancelled cooperatively
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelOutcome, OrchestratorError> {
        debug!(%job_id, "Orchestrator::cancel: called");
        let cell = self
            .store
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        match self.queue.cancel(&cell).await? {
            CancelOutcome::AlreadyTerminal => Err(OrchestratorError::AlreadyTerminal(job_id.clone())),
            outcome => {
                info!(%job_id, ?outcome, "Job cancel accepted");
                Ok(outcome)
            }
        }
    }

    /// Ordered transitions of a job
    pub fn history(&self, job_id: &JobId) -> Result<Vec<JobHistoryEntry>, OrchestratorError> {
        self.store
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        Ok(self.history.history(job_id).unwrap_or_default())
    }

    /// Ordered progress snapshots of a job
    pub fn progress_events(&self, job_id: &JobId) -> Result<Vec<ProgressEvent>, OrchestratorError> {
        self.store
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        Ok(self.history.progress_events(job_id).unwrap_or_default())
    }

    /// Jobs in submission order, optionally filtered by status
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.store.list(status)
    }

    /// Counts per status plus queue depth
    pub async fn metrics(&self) -> JobMetrics {
        let mut metrics = self.store.metrics();
        metrics.queue_depth = self.queue.depth().await;
        metrics
    }

    pub async fn queue_state(&self) -> QueueState {
        self.queue.state().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Live worker pool statistics; final ones after shutdown
    pub fn scheduler_stats(&self) -> SchedulerStats {
        let lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Idle => SchedulerStats::default(),
            Lifecycle::Running(running) => running
                .scheduler_stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            Lifecycle::Stopped(stats) => stats.clone(),
        }
    }

    /// Stream of every job event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Wait until a job reaches a terminal status
    pub async fn wait_for_terminal(&self, job_id: &JobId, timeout: Duration) -> Result<Job, OrchestratorError> {
        debug!(%job_id, ?timeout, "Orchestrator::wait_for_terminal: called");
        // Subscribe before the first check so the final transition cannot slip between them
        let mut rx = self.events.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let job = self.status(job_id)?;
            if job.is_terminal() {
                return Ok(job);
            }

            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Err(_) => return Err(OrchestratorError::WaitTimeout(job_id.clone())),
                    Ok(Ok(event)) => {
                        if event.job_id() == job_id && event.is_terminal() {
                            break;
                        }
                    }
                    Ok(Err(RecvError::Lagged(skipped))) => {
                        debug!(skipped, "wait_for_terminal: lagged, rechecking status");
                        break;
                    }
                    Ok(Err(RecvError::Closed)) => {
                        let job = self.status(job_id)?;
                        return if job.is_terminal() {
                            Ok(job)
                        } else {
                            Err(OrchestratorError::WaitTimeout(job_id.clone()))
                        };
                    }
                }
            }
        }
    }
}
