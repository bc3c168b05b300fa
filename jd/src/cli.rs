//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::Priority;

/// JobDaemon - job orchestration core
#[derive(Parser)]
#[command(
    name = "jd",
    about = "Run jobs through a prioritized worker pool with retries, rate limiting and result caching",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit one job, wait for it and print its history
    Run {
        /// Job type (see `jd types`)
        #[arg(value_name = "TYPE")]
        job_type: String,

        /// Job payload as a JSON object
        #[arg(value_name = "PAYLOAD", default_value = "{}")]
        payload: String,

        /// Priority (low, normal, high)
        #[arg(short, long, default_value = "normal")]
        priority: Priority,

        /// Retry budget (defaults to retry.max-retries)
        #[arg(short, long)]
        max_retries: Option<u32>,

        /// Seconds to wait for a terminal status
        #[arg(short, long, default_value = "300")]
        timeout: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run every job listed in a YAML file and print a summary
    Batch {
        /// YAML list of job requests
        file: PathBuf,

        /// Seconds to wait for all jobs
        #[arg(short, long, default_value = "600")]
        timeout: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List available job types
    Types,

    /// Print the effective configuration as YAML
    Config,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
        .join("logs")
        .join("jobdaemon.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Output format for run/batch results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
