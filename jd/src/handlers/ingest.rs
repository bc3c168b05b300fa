//! Batch record ingestion

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::domain::JobError;
use crate::worker::{JobContext, JobHandler};

/// Ingest payload
#[derive(Debug, Clone, Deserialize)]
pub struct IngestParams {
    /// Number of records to ingest
    pub records: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Simulated time per batch
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Attempts that fail with a network error before one succeeds
    #[serde(default)]
    pub transient_failures: u32,
}

fn default_batch_size() -> u64 {
    100
}

fn default_batch_delay_ms() -> u64 {
    10
}

impl IngestParams {
    pub fn parse(payload: &Value) -> Result<Self, String> {
        let params: Self = serde_json::from_value(payload.clone()).map_err(|e| format!("invalid ingest payload: {}", e))?;
        if params.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }
        Ok(params)
    }
}

/// Reads records in batches, reporting progress after each
pub struct IngestHandler;

#[async_trait]
impl JobHandler for IngestHandler {
    fn description(&self) -> &str {
        "Batch record ingestion with progress reporting"
    }

    fn validate(&self, payload: &Value) -> Result<(), String> {
        IngestParams::parse(payload).map(|_| ())
    }

    async fn run(&self, payload: Value, ctx: JobContext) -> Result<Value, JobError> {
        let params = IngestParams::parse(&payload).map_err(JobError::Validation)?;
        debug!(job_id = %ctx.job_id(), records = params.records, attempt = ctx.attempt(), "IngestHandler::run: called");

        if ctx.attempt() <= params.transient_failures {
            return Err(JobError::Network(format!(
                "source unavailable (attempt {})",
                ctx.attempt()
            )));
        }

        ctx.set_total_records(params.records)?;
        ctx.set_stage("ingest")?;

        let started = Instant::now();
        let mut processed = 0;
        let mut batches = 0;
        while processed < params.records {
            tokio::time::sleep(Duration::from_millis(params.batch_delay_ms)).await;
            processed = (processed + params.batch_size).min(params.records);
            batches += 1;
            ctx.report_records(processed)?;
        }

        let elapsed = started.elapsed();
        ctx.report_usage(|usage| usage.cpu_time_ms += elapsed.as_millis() as u64);
        ctx.set_stage("done")?;

        Ok(json!({
            "records_ingested": processed,
            "batches": batches,
            "duration_ms": elapsed.as_millis() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let params = IngestParams::parse(&json!({ "records": 250 })).unwrap();
        assert_eq!(params.records, 250);
        assert_eq!(params.batch_size, 100);
        assert_eq!(params.transient_failures, 0);
    }

    #[test]
    fn test_validate_rejects_bad_payloads() {
        let handler = IngestHandler;
        assert!(handler.validate(&json!({})).is_err());
        assert!(handler.validate(&json!({ "records": "ten" })).is_err());
        assert!(handler.validate(&json!({ "records": 10, "batch_size": 0 })).is_err());
        assert!(handler.validate(&json!({ "records": 10 })).is_ok());
    }
}
