//! Worker pool
//!
//! Claims jobs from the queue and runs each on its own tokio task, bounded by
//! a semaphore of worker slots.

mod config;
mod core;

pub use config::SchedulerConfig;
pub use core::{Scheduler, SchedulerStats};
