//! Queue entry types

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::Priority;
use crate::state::JobCell;

/// A job eligible for claim
#[derive(Debug, Clone)]
pub struct ReadyEntry {
    pub cell: Arc<JobCell>,
    pub priority: Priority,
    pub sequence: u64,
}

impl ReadyEntry {
    pub fn new(cell: Arc<JobCell>) -> Self {
        let (priority, sequence) = cell.read(|job| (job.priority, job.sequence));
        Self {
            cell,
            priority,
            sequence,
        }
    }
}

impl Eq for ReadyEntry {}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cell.id() == other.cell.id()
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A retrying job waiting out its backoff
#[derive(Debug, Clone)]
pub struct DelayedEntry {
    pub cell: Arc<JobCell>,
    pub visible_at: Instant,
    pub sequence: u64,
}

impl Eq for DelayedEntry {}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cell.id() == other.cell.id()
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest visibility on top of the max-heap
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Statistics for the queue
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_claimed: u64,
    pub total_requeued: u64,
    pub total_cancelled: u64,
    pub peak_depth: usize,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    /// Jobs eligible for claim
    pub ready: usize,
    /// Retrying jobs not yet visible
    pub delayed: usize,
    pub stats: QueueStats,
}

/// Result of a cancel request against the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was waiting and is now cancelled
    Cancelled,
    /// The job is processing; its worker will stop at the next checkpoint
    Requested,
    /// The job had already finished
    AlreadyTerminal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Job;
    use serde_json::json;
    use std::collections::BinaryHeap;
    use std::time::Duration;

    fn entry(priority: Priority, sequence: u64) -> ReadyEntry {
        let mut job = Job::new("ingest", json!({}), priority);
        job.sequence = sequence;
        ReadyEntry::new(Arc::new(JobCell::new(job)))
    }

    #[test]
    fn test_ready_entry_ordering() {
        let high = entry(Priority::High, 2);
        let normal = entry(Priority::Normal, 1);
        let low = entry(Priority::Low, 0);

        assert!(high > normal);
        assert!(normal > low);
    }

    #[test]
    fn test_ready_entry_same_priority_fifo() {
        let first = entry(Priority::Normal, 1);
        let second = entry(Priority::Normal, 2);

        // Earlier submission is "greater" so the heap pops it first
        assert!(first > second);
    }

    #[test]
    fn test_delayed_heap_pops_earliest() {
        let now = Instant::now();
        let cell = |seq| {
            let mut job = Job::new("ingest", json!({}), Priority::Normal);
            job.sequence = seq;
            Arc::new(JobCell::new(job))
        };
        let mut heap = BinaryHeap::new();
        heap.push(DelayedEntry {
            cell: cell(0),
            visible_at: now + Duration::from_secs(5),
            sequence: 0,
        });
        heap.push(DelayedEntry {
            cell: cell(1),
            visible_at: now + Duration::from_secs(1),
            sequence: 1,
        });

        assert_eq!(heap.pop().unwrap().sequence, 1);
        assert_eq!(heap.pop().unwrap().sequence, 0);
    }
}
