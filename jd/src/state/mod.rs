//! In-memory job state
//!
//! JobStore indexes every submitted job; each job lives in a JobCell whose
//! write lock serializes its transitions and history appends.

mod cell;
mod store;

pub use cell::{JobCell, ProgressUpdate};
pub use store::{JobMetrics, JobStore};
