//! Append-only job history
//!
//! Every status transition and progress snapshot lands here and is mirrored
//! onto the event bus.

mod recorder;

pub use recorder::HistoryRecorder;
