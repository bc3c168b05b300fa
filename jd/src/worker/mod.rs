//! Job execution
//!
//! Handlers are registered per job type; the executor runs one claimed attempt
//! with a [`JobContext`] giving access to rate limiting, caching and progress
//! reporting.

mod context;
mod executor;
mod handler;

pub use context::JobContext;
pub use executor::{AttemptOutcome, Executor};
pub use handler::{HandlerRegistry, JobHandler};
