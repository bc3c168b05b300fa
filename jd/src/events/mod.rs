//! Event bus for live job observability
//!
//! Every status transition, progress report and retry decision is emitted on a
//! broadcast channel. Consumers (the JSONL logger, CLI waiters) subscribe.
//!
//! ```text
//!   HistoryRecorder     Worker executor
//!   - Submitted         - RetryScheduled
//!   - StatusChanged
//!   - Progress
//!          |                  |
//!          v                  v
//!   +----------------------------------+
//!   |            EVENT BUS             |
//!   |  (tokio::sync::broadcast channel)|
//!   +----------------------------------+
//!          |                  |
//!          v                  v
//!    EventLogger          subscribers
//!    <dir>/<id>/events.jsonl
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobdaemon::events::{EventBus, JobEvent};
//!
//! let bus = Arc::new(EventBus::with_default_capacity());
//! let mut rx = bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{} {}", event.job_id(), event.event_type());
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use logger::{EventLogger, read_job_events, spawn_event_logger};
pub use types::{EventLogEntry, JobEvent};
