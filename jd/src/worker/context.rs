//! JobContext - the services a running handler may use
//!
//! Every suspension point (rate-limit wait, cache wait) races the job's
//! cancellation token, and every report is refused once cancel is requested.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::cache::{Fingerprint, ResultCache};
use crate::domain::{JobError, JobId, ResourceUsage};
use crate::history::HistoryRecorder;
use crate::ratelimit::RateLimiter;
use crate::state::{JobCell, ProgressUpdate};

/// Per-attempt handle passed to [`JobHandler::run`](super::JobHandler::run)
#[derive(Clone)]
pub struct JobContext {
    cell: Arc<JobCell>,
    history: Arc<HistoryRecorder>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    attempt: u32,
}

impl JobContext {
    pub fn new(
        cell: Arc<JobCell>,
        history: Arc<HistoryRecorder>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResultCache>,
    ) -> Self {
        let attempt = cell.read(|job| job.attempts);
        Self {
            cell,
            history,
            limiter,
            cache,
            attempt,
        }
    }

    pub fn job_id(&self) -> &JobId {
        self.cell.id()
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancel_requested()
    }

    /// Stage boundary: fails with `Cancelled` once cancel is requested
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            debug!(job_id = %self.job_id(), "JobContext::checkpoint: cancelled");
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    pub fn set_stage(&self, stage: impl Into<String>) -> Result<(), JobError> {
        self.cell.report_progress(
            &self.history,
            ProgressUpdate {
                stage: Some(stage.into()),
                ..Default::default()
            },
        )
    }

    /// Report fraction complete; values below the current progress are ignored
    pub fn report_progress(&self, progress: f64, records_processed: Option<u64>) -> Result<(), JobError> {
        self.cell.report_progress(
            &self.history,
            ProgressUpdate {
                progress: Some(progress),
                records_processed,
                ..Default::default()
            },
        )
    }

    /// Report processed records; progress follows when the total is known
    pub fn report_records(&self, records_processed: u64) -> Result<(), JobError> {
        self.cell.report_progress(
            &self.history,
            ProgressUpdate {
                records_processed: Some(records_processed),
                ..Default::default()
            },
        )
    }

    pub fn set_total_records(&self, total: u64) -> Result<(), JobError> {
        self.checkpoint()?;
        self.cell.modify(|job| job.total_records = Some(total));
        Ok(())
    }

    /// Update the resource usage snapshot
    pub fn report_usage(&self, f: impl FnOnce(&mut ResourceUsage)) {
        self.cell.modify(|job| f(&mut job.resource_usage));
    }

    /// Wait for a rate-limit token for `endpoint`
    pub async fn acquire(&self, endpoint: &str) -> Result<(), JobError> {
        self.checkpoint()?;
        tokio::select! {
            _ = self.cell.cancel_token().cancelled() => Err(JobError::Cancelled),
            result = self.limiter.acquire_default(endpoint) => result.map_err(JobError::from),
        }
    }

    /// Memoize `compute` under `fingerprint`; `ttl` defaults to the cache TTL
    pub async fn cached<F, Fut>(&self, fingerprint: Fingerprint, ttl: Option<Duration>, compute: F) -> Result<Value, JobError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, JobError>>,
    {
        self.checkpoint()?;
        let ttl = ttl.unwrap_or_else(|| self.cache.config().ttl());
        tokio::select! {
            _ = self.cell.cancel_token().cancelled() => Err(JobError::Cancelled),
            result = self.cache.get_or_compute(fingerprint, ttl, compute) => result,
        }
    }

    /// Call a downstream endpoint through the cache and the rate limiter
    ///
    /// The request fingerprint keys the cache; a token is only taken when the
    /// call actually goes out.
    pub async fn call<F, Fut>(&self, endpoint: &str, request: Value, f: F) -> Result<Value, JobError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, JobError>>,
    {
        debug!(job_id = %self.job_id(), %endpoint, "JobContext::call: called");
        let fingerprint = Fingerprint::of(endpoint, &request);
        let computed = AtomicBool::new(false);

        let result = self
            .cached(fingerprint, None, || async {
                computed.store(true, Ordering::Relaxed);
                self.acquire(endpoint).await?;
                self.report_usage(|usage| usage.downstream_calls += 1);
                f(request).await
            })
            .await;

        if result.is_ok() && !computed.load(Ordering::Relaxed) {
            debug!(job_id = %self.job_id(), %endpoint, "JobContext::call: served from cache");
            self.report_usage(|usage| usage.cache_hits += 1);
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn cell_for_test(&self) -> &Arc<JobCell> {
        &self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::domain::{Job, JobStatus, Priority};
    use crate::events::EventBus;
    use crate::ratelimit::{BucketConfig, RateLimitConfig};
    use serde_json::json;

    fn context(capacity: u32) -> (JobContext, Arc<JobCell>, Arc<HistoryRecorder>) {
        let history = Arc::new(HistoryRecorder::new(Arc::new(EventBus::new(256))));
        let cell = Arc::new(JobCell::new(Job::new("bias-analysis", json!({}), Priority::Normal)));
        cell.transition(&history, JobStatus::Queued, None).unwrap();
        cell.transition(&history, JobStatus::Processing, None).unwrap();
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            default: BucketConfig {
                capacity,
                refill_per_sec: 0.01,
            },
            acquire_timeout_ms: 50,
            ..Default::default()
        }));
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let ctx = JobContext::new(cell.clone(), history.clone(), limiter, cache);
        (ctx, cell, history)
    }

    #[tokio::test]
    async fn test_call_uses_cache_then_limiter() {
        let (ctx, cell, _history) = context(5);

        let first = ctx
            .call("analysis", json!({"model": "m"}), |_req| async { Ok(json!({"score": 1})) })
            .await
            .unwrap();
        let second = ctx
            .call("analysis", json!({"model": " m "}), |_req| async { Ok(json!({"score": 2})) })
            .await
            .unwrap();

        assert_eq!(first, second);
        let usage = cell.snapshot().resource_usage;
        assert_eq!(usage.downstream_calls, 1);
        assert_eq!(usage.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_call_rate_limited_when_bucket_empty() {
        let (ctx, _cell, _history) = context(1);
        ctx.call("analysis", json!({"n": 1}), |_| async { Ok(json!(1)) })
            .await
            .unwrap();

        let err = ctx
            .call("analysis", json!({"n": 2}), |_| async { Ok(json!(2)) })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_progress_recorded_with_attempt() {
        let (ctx, cell, history) = context(1);
        assert_eq!(ctx.attempt(), 1);
        ctx.set_stage("extract").unwrap();
        ctx.report_progress(0.5, Some(10)).unwrap();

        let events = history.progress_events(cell.id()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].attempt, 1);
        assert_eq!(events[1].stage.as_deref(), Some("extract"));
        assert_eq!(events[1].records_processed, 10);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_suspension_points() {
        let (ctx, cell, _history) = context(0);
        cell.request_cancel();

        assert!(matches!(ctx.checkpoint(), Err(JobError::Cancelled)));
        assert!(matches!(ctx.acquire("analysis").await, Err(JobError::Cancelled)));
        assert!(matches!(ctx.set_stage("late"), Err(JobError::Cancelled)));
        assert!(matches!(ctx.set_total_records(5), Err(JobError::Cancelled)));
    }
}
