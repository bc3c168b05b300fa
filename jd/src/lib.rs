//! JobDaemon - job orchestration core
//!
//! Runs asynchronous processing requests (data ingestion, analysis calls)
//! under a bounded worker pool, with classified retries, per-endpoint rate
//! limiting and a single-flight result cache. Every state transition lands in
//! an append-only history.
//!
//! # Modules
//!
//! - [`domain`] - Job, status state machine, failure taxonomy
//! - [`queue`] - priority queue with exclusive claim and delayed requeue
//! - [`scheduler`] - fixed-size worker pool
//! - [`worker`] - handler registry, per-attempt context and executor
//! - [`retry`] - backoff policy and retry decisions
//! - [`ratelimit`] - per-endpoint token buckets
//! - [`cache`] - fingerprint-keyed result cache
//! - [`history`] - transition and progress ledger
//! - [`events`] - event bus and JSONL event log
//! - [`orchestrator`] - submission gateway and lifecycle
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cache;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod handlers;
pub mod history;
pub mod orchestrator;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use domain::{ErrorKind, Job, JobError, JobHistoryEntry, JobId, JobStatus, Priority, ProgressEvent};
pub use events::{EventBus, JobEvent};
pub use orchestrator::{JobRequest, Orchestrator, OrchestratorError};
pub use queue::CancelOutcome;
pub use worker::{HandlerRegistry, JobContext, JobHandler};
