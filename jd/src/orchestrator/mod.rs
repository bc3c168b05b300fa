//! Submission gateway
//!
//! ```text
//! submit ──► JobStore ──► JobQueue ──► Scheduler ──► Executor ──► handler
//!                │            ▲                         │
//!                │            └──── retrying ◄──────────┤
//!                ▼                                      ▼
//!          HistoryRecorder ◄───────── every transition ─┘
//!                │
//!                └──► EventBus ──► subscribers, EventLogger
//! ```

mod core;
mod error;

pub use core::{JobRequest, Orchestrator};
pub use error::OrchestratorError;
