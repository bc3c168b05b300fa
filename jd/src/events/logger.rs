//! Event Logger - persists events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and writes all events to
//! per-job JSONL files, giving the in-memory history a durable trail.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, JobEvent};

/// Event logger that writes events to `{log_dir}/{job-id}/events.jsonl`
pub struct EventLogger {
    log_dir: PathBuf,
    /// Open file writers per job
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    /// Create a new event logger
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        let log_dir = log_dir.as_ref().to_path_buf();
        debug!(?log_dir, "EventLogger::new: creating logger");
        Self {
            log_dir,
            writers: HashMap::new(),
        }
    }

    /// Default log directory (`<data_local_dir>/jobdaemon/jobs`)
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jobdaemon")
            .join("jobs")
    }

    /// Write an event to its job's log file
    pub fn write_event(&mut self, event: &JobEvent) -> eyre::Result<()> {
        let job_id = event.job_id().as_str();
        debug!(%job_id, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(job_id) {
            let job_dir = self.log_dir.join(job_id);
            fs::create_dir_all(&job_dir)?;

            let log_path = job_dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(job_id.to_string(), BufWriter::new(file));
        }
        let writer = self
            .writers
            .get_mut(job_id)
            .ok_or_else(|| eyre::eyre!("No writer for job {}", job_id))?;

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for a job (e.g., when it reaches a terminal status)
    pub fn close_job(&mut self, job_id: &str) {
        debug!(%job_id, "EventLogger::close_job");
        if let Some(mut writer) = self.writers.remove(job_id) {
            let _ = writer.flush();
        }
    }

    /// Run the logger, consuming events from the bus until shutdown
    pub async fn run(mut self, mut rx: broadcast::Receiver<JobEvent>, shutdown: CancellationToken) {
        debug!("EventLogger::run: starting event logger");

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("EventLogger: shutdown requested");
                    break;
                }
                received = rx.recv() => received,
            };

            match received {
                Ok(event) => {
                    let job_id = event.job_id().as_str().to_string();
                    if let Err(e) = self.write_event(&event) {
                        error!(%job_id, error = %e, "EventLogger: failed to write event");
                    }
                    if event.is_terminal() {
                        self.close_job(&job_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        // Drain whatever is already buffered so terminal events are not lost on shutdown
        while let Ok(event) = rx.try_recv() {
            if let Err(e) = self.write_event(&event) {
                error!(job_id = %event.job_id(), error = %e, "EventLogger: failed to write event");
            }
        }

        for (job_id, mut writer) in self.writers.drain() {
            debug!(%job_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read events from a job's log file
pub fn read_job_events(log_dir: impl AsRef<Path>, job_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = log_dir.as_ref().join(job_id).join("events.jsonl");
    debug!(?log_path, "read_job_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_job_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_job_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(
    event_bus: &Arc<EventBus>,
    log_dir: impl AsRef<Path>,
    shutdown: CancellationToken,
) -> eyre::Result<tokio::task::JoinHandle<()>> {
    fs::create_dir_all(log_dir.as_ref())?;
    let logger = EventLogger::new(log_dir);
    // Subscribe before spawning so no event emitted after this call is missed
    let rx = event_bus.subscribe();
    Ok(tokio::spawn(async move {
        logger.run(rx, shutdown).await;
    }))
}
