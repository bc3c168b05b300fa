//! Domain types for jobdaemon
//!
//! Core domain types: Job, JobStatus, JobHistoryEntry and the failure taxonomy.

mod error;
mod history;
mod id;
mod job;
mod priority;

pub use error::{ErrorKind, JobError, JobFailure};
pub use history::{JobHistoryEntry, ProgressEvent};
pub use id::{JobId, generate_id};
pub use job::{Job, JobStatus, ResourceUsage, TransitionError};
pub use priority::Priority;
