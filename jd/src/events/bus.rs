//! Event Bus - central pub/sub system for job events
//!
//! The EventBus uses tokio broadcast channels to deliver events to all subscribers
//! with minimal latency. The history recorder and workers emit, consumers
//! (event logger, CLI waiters) subscribe.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::JobEvent;
use crate::domain::{ErrorKind, JobId, JobStatus, Priority};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for job activity streaming
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// This is fire-and-forget: if there are no subscribers, the event is dropped.
    /// If the channel is full, oldest events are dropped.
    pub fn emit(&self, event: JobEvent) {
        debug!(event_type = event.event_type(), job_id = %event.job_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to one job
    pub fn emitter_for(&self, job_id: JobId) -> EventEmitter {
        debug!(%job_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            job_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events without owning the bus
///
/// EventEmitter is cheap to clone and carries a pre-set job ID.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<JobEvent>,
    job_id: JobId,
}

impl EventEmitter {
    /// Emit a raw event
    pub fn emit(&self, event: JobEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn submitted(&self, job_type: &str, priority: Priority) {
        self.emit(JobEvent::Submitted {
            job_id: self.job_id.clone(),
            job_type: job_type.to_string(),
            priority,
        });
    }

    pub fn status_changed(&self, from: Option<JobStatus>, to: JobStatus, metadata: Option<Value>) {
        self.emit(JobEvent::StatusChanged {
            job_id: self.job_id.clone(),
            from,
            to,
            metadata,
        });
    }

    pub fn progress(&self, attempt: u32, progress: f64, stage: Option<String>, records_processed: u64) {
        self.emit(JobEvent::Progress {
            job_id: self.job_id.clone(),
            attempt,
            progress,
            stage,
            records_processed,
        });
    }

    pub fn retry_scheduled(&self, retry_count: u32, delay_ms: u64, error_kind: ErrorKind) {
        self.emit(JobEvent::RetryScheduled {
            job_id: self.job_id.clone(),
            retry_count,
            delay_ms,
            error_kind,
        });
    }
}
