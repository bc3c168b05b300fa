//! Job queue
//!
//! A priority heap of claimable jobs plus a visibility-delayed heap for
//! retries, guarded by one mutex and woken through a `Notify`.

mod core;
mod entry;

pub use core::JobQueue;
pub use entry::{CancelOutcome, DelayedEntry, QueueState, QueueStats, ReadyEntry};
