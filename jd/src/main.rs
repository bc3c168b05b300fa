//! JobDaemon - job orchestration core
//!
//! CLI entry point: runs jobs through an in-process orchestrator with the
//! built-in handlers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info};

use jobdaemon::cli::{Cli, Command, OutputFormat};
use jobdaemon::config::Config;
use jobdaemon::domain::{Job, JobHistoryEntry, JobId, JobStatus, Priority};
use jobdaemon::events::EventLogger;
use jobdaemon::handlers::builtin_registry;
use jobdaemon::orchestrator::{JobRequest, Orchestrator};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("jobdaemon.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run {
            job_type,
            payload,
            priority,
            max_retries,
            timeout,
            format,
        }) => cmd_run(config, &job_type, &payload, priority, max_retries, timeout, format).await,
        Some(Command::Batch { file, timeout, format }) => cmd_batch(config, &file, timeout, format).await,
        Some(Command::Types) => cmd_types(),
        Some(Command::Config) => cmd_config(&config),
        None => {
            debug!("main: no command, listing types");
            cmd_types()
        }
    }
}

/// Fill in the CLI's default event log directory
fn with_event_log(mut config: Config) -> Config {
    if config.history.log_dir.is_none() {
        config.history.log_dir = Some(EventLogger::default_dir());
    }
    config
}

fn colored_status(status: JobStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        JobStatus::Completed => text.green(),
        JobStatus::Failed => text.red(),
        JobStatus::Cancelled => text.yellow(),
        _ => text.normal(),
    }
}

fn print_history(history: &[JobHistoryEntry]) {
    for entry in history {
        let from = entry
            .from_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let metadata = entry
            .metadata
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_default();
        println!(
            "  {} {:>10} -> {:<10} {}",
            entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            from,
            colored_status(entry.to_state),
            metadata.dimmed()
        );
    }
}

/// Submit one job and wait for it
async fn cmd_run(
    config: Config,
    job_type: &str,
    payload: &str,
    priority: Priority,
    max_retries: Option<u32>,
    timeout: u64,
    format: OutputFormat,
) -> Result<()> {
    debug!(%job_type, %priority, ?max_retries, timeout, "cmd_run: called");
    let payload: Value = serde_json::from_str(payload).context("PAYLOAD must be valid JSON")?;
    let config = with_event_log(config);
    let log_dir = config.history.log_dir.clone();

    let orchestrator = Orchestrator::new(config, builtin_registry());
    orchestrator.start()?;

    let mut request = JobRequest::new(job_type, payload, priority);
    request.max_retries = max_retries;
    let job_id = match orchestrator.submit_request(request).await {
        Ok(job_id) => job_id,
        Err(e) => {
            orchestrator.shutdown().await;
            return Err(e.into());
        }
    };

    let waited = orchestrator.wait_for_terminal(&job_id, Duration::from_secs(timeout)).await;
    let history = orchestrator.history(&job_id)?;
    orchestrator.shutdown().await;
    let job = match waited {
        Ok(job) => job,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            orchestrator.status(&job_id)?
        }
    };

    match format {
        OutputFormat::Json => {
            let output = json!({ "job": job, "history": history });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Job: {}", job.id.to_string().cyan());
            println!("Type: {}  Priority: {}", job.job_type, job.priority);
            println!(
                "Status: {}  Retries: {}/{}  Attempts: {}",
                colored_status(job.status),
                job.retry_count,
                job.max_retries,
                job.attempts
            );
            if let Some(error) = &job.last_error {
                println!("Last error: {} ({})", error.message, error.kind);
            }
            if let Some(result) = &job.result {
                println!("Result: {}", serde_json::to_string_pretty(result)?);
            }
            println!();
            println!("History:");
            print_history(&history);
            if let Some(dir) = log_dir {
                println!();
                println!("Events: {}", dir.join(job.id.as_str()).join("events.jsonl").display().to_string().dimmed());
            }
        }
    }

    match job.status {
        JobStatus::Completed => Ok(()),
        status => Err(eyre::eyre!("Job {} ended {}", job.id, status)),
    }
}

/// Run every job in a YAML file
async fn cmd_batch(config: Config, file: &Path, timeout: u64, format: OutputFormat) -> Result<()> {
    debug!(?file, timeout, "cmd_batch: called");
    let content = fs::read_to_string(file).context(format!("Failed to read {}", file.display()))?;
    let requests: Vec<JobRequest> = serde_yaml::from_str(&content).context("Failed to parse batch file")?;
    info!(count = requests.len(), "cmd_batch: loaded requests");

    let orchestrator = Orchestrator::new(with_event_log(config), builtin_registry());
    orchestrator.start()?;

    let mut submitted: Vec<JobId> = Vec::new();
    let mut rejected: Vec<(String, String)> = Vec::new();
    for request in requests {
        let job_type = request.job_type.clone();
        match orchestrator.submit_request(request).await {
            Ok(job_id) => submitted.push(job_id),
            Err(e) => rejected.push((job_type, e.to_string())),
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
    for job_id in &submitted {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if let Err(e) = orchestrator.wait_for_terminal(job_id, remaining).await {
            debug!(%job_id, error = %e, "cmd_batch: wait failed");
        }
    }

    let jobs: Vec<Job> = submitted
        .iter()
        .filter_map(|job_id| orchestrator.status(job_id).ok())
        .collect();
    let metrics = orchestrator.metrics().await;
    let queue = orchestrator.queue_state().await;
    let cache = orchestrator.cache_stats();
    let scheduler = orchestrator.shutdown().await;

    match format {
        OutputFormat::Json => {
            let output = json!({
                "jobs": jobs,
                "rejected": rejected
                    .iter()
                    .map(|(job_type, error)| json!({ "type": job_type, "error": error }))
                    .collect::<Vec<_>>(),
                "metrics": metrics,
                "queue": queue,
                "cache": cache,
                "scheduler": scheduler,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("{:<40} {:<18} {:<10} {:>7} {:>8}", "JOB", "TYPE", "STATUS", "RETRIES", "PROGRESS");
            for job in &jobs {
                println!(
                    "{:<40} {:<18} {:<10} {:>7} {:>7.0}%",
                    job.id.to_string(),
                    job.job_type,
                    colored_status(job.status),
                    job.retry_count,
                    job.progress * 100.0
                );
            }
            for (job_type, error) in &rejected {
                println!("{} {}: {}", "✗".red(), job_type, error);
            }
            println!();
            println!(
                "Completed: {}  Failed: {}  Cancelled: {}  Rejected: {}",
                metrics.completed.to_string().green(),
                metrics.failed.to_string().red(),
                metrics.cancelled.to_string().yellow(),
                rejected.len()
            );
            println!(
                "Retries: {}  Cache hits: {}  Misses: {}  Peak workers: {}",
                metrics.total_retries, cache.hits, cache.misses, scheduler.peak_concurrent
            );
        }
    }

    Ok(())
}

/// List available job types
fn cmd_types() -> Result<()> {
    debug!("cmd_types: called");
    let registry = builtin_registry();
    println!("Available job types:");
    println!();
    for (name, description) in registry.types() {
        println!("  {}", name.cyan());
        println!("    {}", description);
    }
    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config).context("Failed to serialize config")?);
    Ok(())
}
