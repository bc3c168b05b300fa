//! JobStore - in-memory index of every submitted job

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

use crate::domain::{Job, JobId, JobStatus};

use super::cell::JobCell;

/// Aggregated job counts
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct JobMetrics {
    /// Total number of submitted jobs
    pub total_jobs: u64,
    pub pending: u64,
    pub queued: u64,
    pub processing: u64,
    pub retrying: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Retries consumed across all jobs
    pub total_retries: u64,
    /// Jobs waiting in the queue (ready + delayed)
    pub queue_depth: usize,
}

/// Index of job cells keyed by ID
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<JobCell>>>,
    sequence: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the submission sequence and store the job
    pub fn insert(&self, mut job: Job) -> Arc<JobCell> {
        job.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!(job_id = %job.id, sequence = job.sequence, "JobStore::insert: called");
        let cell = Arc::new(JobCell::new(job));
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(cell.id().clone(), cell.clone());
        cell
    }

    pub fn get(&self, job_id: &JobId) -> Option<Arc<JobCell>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(job_id).cloned()
    }

    pub fn snapshot(&self, job_id: &JobId) -> Option<Job> {
        self.get(job_id).map(|cell| cell.snapshot())
    }

    fn cells(&self) -> Vec<Arc<JobCell>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.values().cloned().collect()
    }

    /// Snapshots in submission order, optionally filtered by status
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        debug!(?status, "JobStore::list: called");
        let mut jobs: Vec<Job> = self
            .cells()
            .iter()
            .map(|cell| cell.snapshot())
            .filter(|job| status.is_none_or(|s| job.status == s))
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count jobs per status
    pub fn metrics(&self) -> JobMetrics {
        debug!("JobStore::metrics: called");
        let mut metrics = JobMetrics::default();
        for cell in self.cells() {
            let (status, retries) = cell.read(|job| (job.status, job.retry_count));
            metrics.total_jobs += 1;
            metrics.total_retries += u64::from(retries);
            match status {
                JobStatus::Pending => metrics.pending += 1,
                JobStatus::Queued => metrics.queued += 1,
                JobStatus::Processing => metrics.processing += 1,
                JobStatus::Retrying => metrics.retrying += 1,
                JobStatus::Completed => metrics.completed += 1,
                JobStatus::Failed => metrics.failed += 1,
                JobStatus::Cancelled => metrics.cancelled += 1,
            }
        }
        metrics
    }
}
