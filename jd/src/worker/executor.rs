//! Executor - runs one claimed attempt and routes its outcome
//!
//! Success settles the job as completed. Failures go through the retry
//! controller: either a delayed requeue or a terminal failure. A raised cancel
//! flag overrides every outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::cache::ResultCache;
use crate::domain::{ErrorKind, JobError, JobFailure, JobStatus};
use crate::history::HistoryRecorder;
use crate::queue::JobQueue;
use crate::ratelimit::RateLimiter;
use crate::retry::{RetryController, RetryDecision};
use crate::state::JobCell;

use super::context::JobContext;
use super::handler::HandlerRegistry;

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    Retrying { delay: Duration },
    Failed(ErrorKind),
    Cancelled,
    /// The job was no longer processing when the outcome was applied
    Abandoned,
}

/// Shared services needed to run attempts
pub struct Executor {
    registry: Arc<HandlerRegistry>,
    queue: Arc<JobQueue>,
    history: Arc<HistoryRecorder>,
    retry: RetryController,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    job_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        queue: Arc<JobQueue>,
        history: Arc<HistoryRecorder>,
        retry: RetryController,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            registry,
            queue,
            history,
            retry,
            limiter,
            cache,
            job_timeout: None,
        }
    }

    /// Bound every attempt; exceeding it is a `timeout` failure
    pub fn with_job_timeout(mut self, job_timeout: Option<Duration>) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    /// Run the handler for a processing job and apply the outcome
    pub async fn execute(&self, cell: Arc<JobCell>) -> AttemptOutcome {
        let (job_type, payload, attempt) = cell.read(|job| (job.job_type.clone(), job.payload.clone(), job.attempts));
        debug!(job_id = %cell.id(), %job_type, attempt, "Executor::execute: called");
        info!(job_id = %cell.id(), %job_type, attempt, "Job started");

        let started = Instant::now();
        let result = self.run_handler(&cell, &job_type, payload).await;
        self.finish(&cell, result, started.elapsed()).await
    }

    async fn run_handler(&self, cell: &Arc<JobCell>, job_type: &str, payload: Value) -> Result<Value, JobError> {
        let Some(handler) = self.registry.get(job_type) else {
            return Err(JobError::Validation(format!(
                "No handler registered for job type '{}'",
                job_type
            )));
        };

        let ctx = JobContext::new(
            cell.clone(),
            self.history.clone(),
            self.limiter.clone(),
            self.cache.clone(),
        );
        let run = async {
            match AssertUnwindSafe(handler.run(payload, ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(JobError::Unknown {
                    message: format!("Handler panicked: {}", panic_message(&*panic)),
                    trace: Some(format!("job type '{}'", job_type)),
                }),
            }
        };

        match self.job_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(JobError::Timeout(limit))),
            None => run.await,
        }
    }

    async fn finish(&self, cell: &Arc<JobCell>, result: Result<Value, JobError>, elapsed: Duration) -> AttemptOutcome {
        let job_id = cell.id().clone();
        match result {
            Ok(value) => {
                let (attempt, records) = cell.read(|job| (job.attempts, job.records_processed));
                let metadata = json!({
                    "attempt": attempt,
                    "duration_ms": elapsed.as_millis() as u64,
                    "records_processed": records,
                });
                match cell.settle(&self.history, JobStatus::Completed, Some(metadata), |job| {
                    job.result = Some(value)
                }) {
                    Ok(JobStatus::Completed) => {
                        info!(%job_id, ?elapsed, "Job completed");
                        AttemptOutcome::Completed
                    }
                    Ok(_) => {
                        info!(%job_id, "Job cancelled; result discarded");
                        AttemptOutcome::Cancelled
                    }
                    Err(e) => {
                        error!(%job_id, error = %e, "Failed to record completion");
                        AttemptOutcome::Abandoned
                    }
                }
            }
            Err(JobError::Cancelled) => {
                let metadata = json!({ "reason": "handler stopped on cancel" });
                match cell.settle(&self.history, JobStatus::Cancelled, Some(metadata), |_| {}) {
                    Ok(_) => {
                        info!(%job_id, "Job cancelled");
                        AttemptOutcome::Cancelled
                    }
                    Err(e) => {
                        error!(%job_id, error = %e, "Failed to record cancellation");
                        AttemptOutcome::Abandoned
                    }
                }
            }
            Err(err) => self.handle_failure(cell, err).await,
        }
    }

    async fn handle_failure(&self, cell: &Arc<JobCell>, err: JobError) -> AttemptOutcome {
        let job_id = cell.id().clone();
        let (retry_count, max_retries) = cell.read(|job| (job.retry_count, job.max_retries));
        let failure = JobFailure::from(&err);
        let kind = failure.kind;

        match self.retry.decide(retry_count, max_retries, &err) {
            RetryDecision::Retry { retry_count, delay } => {
                let metadata = json!({
                    "kind": kind,
                    "message": failure.message,
                    "retry_count": retry_count,
                    "delay_ms": delay.as_millis() as u64,
                });
                let reached = self
                    .queue
                    .requeue(cell, delay, Some(metadata), |job| {
                        job.retry_count = retry_count;
                        job.last_error = Some(failure);
                    })
                    .await;
                match reached {
                    Ok(JobStatus::Retrying) => {
                        warn!(%job_id, %kind, retry_count, max_retries, ?delay, error = %err, "Job attempt failed, retrying");
                        self.history
                            .events()
                            .emitter_for(job_id)
                            .retry_scheduled(retry_count, delay.as_millis() as u64, kind);
                        AttemptOutcome::Retrying { delay }
                    }
                    Ok(_) => AttemptOutcome::Cancelled,
                    Err(e) => {
                        error!(%job_id, error = %e, "Failed to requeue job");
                        AttemptOutcome::Abandoned
                    }
                }
            }
            RetryDecision::Fail => {
                let mut metadata = json!({
                    "kind": kind,
                    "message": failure.message,
                    "retry_count": retry_count,
                });
                if let Some(trace) = &failure.trace {
                    metadata["trace"] = Value::String(trace.clone());
                }
                match cell.settle(&self.history, JobStatus::Failed, Some(metadata), |job| {
                    job.last_error = Some(failure)
                }) {
                    Ok(JobStatus::Failed) => {
                        error!(%job_id, %kind, retry_count, error = %err, "Job failed");
                        AttemptOutcome::Failed(kind)
                    }
                    Ok(_) => AttemptOutcome::Cancelled,
                    Err(e) => {
                        error!(%job_id, error = %e, "Failed to record failure");
                        AttemptOutcome::Abandoned
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
