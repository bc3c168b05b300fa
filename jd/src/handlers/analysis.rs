//! Bias and compliance analysis against a simulated analysis service
//!
//! The statistics are opaque; the service returns a deterministic score per
//! request so repeated calls are cacheable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::cache::Fingerprint;
use crate::domain::JobError;
use crate::worker::{JobContext, JobHandler};

/// Rate-limit and cache namespace of the analysis service
pub const ANALYSIS_ENDPOINT: &str = "analysis-service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Bias,
    Compliance,
}

impl AnalysisKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Bias => "bias",
            Self::Compliance => "compliance",
        }
    }
}

/// Stand-in for the remote analysis service
#[derive(Debug, Default)]
pub struct AnalysisService {
    latency: Duration,
    calls: AtomicU64,
}

impl AnalysisService {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of requests that reached the service
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub async fn evaluate(&self, request: Value) -> Result<Value, JobError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        let bytes = *Fingerprint::of(ANALYSIS_ENDPOINT, &request).as_uuid().as_bytes();
        let score = f64::from(u16::from_be_bytes([bytes[0], bytes[1]])) / f64::from(u16::MAX);
        Ok(json!({
            "attribute": request.get("attribute").cloned().unwrap_or(Value::Null),
            "score": score,
            "flagged": score > 0.8,
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AnalysisParams {
    dataset: String,

    #[serde(default)]
    attributes: Vec<String>,
}

impl AnalysisParams {
    fn parse(payload: &Value) -> Result<Self, String> {
        let params: Self =
            serde_json::from_value(payload.clone()).map_err(|e| format!("invalid analysis payload: {}", e))?;
        if params.dataset.trim().is_empty() {
            return Err("dataset must not be empty".to_string());
        }
        Ok(params)
    }

    fn attributes(&self) -> Vec<String> {
        if self.attributes.is_empty() {
            vec!["overall".to_string()]
        } else {
            self.attributes.clone()
        }
    }
}

/// One analysis call per attribute, routed through the rate limiter and cache
pub struct AnalysisHandler {
    kind: AnalysisKind,
    service: Arc<AnalysisService>,
}

impl AnalysisHandler {
    pub fn new(kind: AnalysisKind, service: Arc<AnalysisService>) -> Self {
        Self { kind, service }
    }
}

#[async_trait]
impl JobHandler for AnalysisHandler {
    fn description(&self) -> &str {
        match self.kind {
            AnalysisKind::Bias => "Bias analysis of a dataset via the analysis service",
            AnalysisKind::Compliance => "Compliance check of a dataset via the analysis service",
        }
    }

    fn validate(&self, payload: &Value) -> Result<(), String> {
        AnalysisParams::parse(payload).map(|_| ())
    }

    async fn run(&self, payload: Value, ctx: JobContext) -> Result<Value, JobError> {
        let params = AnalysisParams::parse(&payload).map_err(JobError::Validation)?;
        let attributes = params.attributes();
        debug!(job_id = %ctx.job_id(), kind = self.kind.as_str(), count = attributes.len(), "AnalysisHandler::run: called");

        ctx.set_stage(self.kind.as_str())?;
        let total = attributes.len();
        let mut findings = Vec::with_capacity(total);
        for (n, attribute) in attributes.into_iter().enumerate() {
            let request = json!({
                "analysis": self.kind.as_str(),
                "dataset": params.dataset,
                "attribute": attribute,
            });
            let service = self.service.clone();
            let finding = ctx
                .call(ANALYSIS_ENDPOINT, request, |request| async move { service.evaluate(request).await })
                .await?;
            findings.push(finding);
            ctx.report_progress((n + 1) as f64 / total as f64, None)?;
        }

        let flagged = findings.iter().filter(|f| f["flagged"] == json!(true)).count();
        Ok(json!({
            "analysis": self.kind.as_str(),
            "dataset": params.dataset,
            "findings": findings,
            "flagged": flagged,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_is_deterministic() {
        let service = AnalysisService::new(Duration::ZERO);
        let request = json!({ "dataset": "loans", "attribute": "age" });
        let a = service.evaluate(request.clone()).await.unwrap();
        let b = service.evaluate(request).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(service.calls(), 2);
        let score = a["score"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_validate() {
        let handler = AnalysisHandler::new(AnalysisKind::Bias, Arc::new(AnalysisService::default()));
        assert!(handler.validate(&json!({ "dataset": "loans" })).is_ok());
        assert!(handler.validate(&json!({ "dataset": "  " })).is_err());
        assert!(handler.validate(&json!({ "attributes": ["age"] })).is_err());
    }

    #[test]
    fn test_default_attribute() {
        let params = AnalysisParams::parse(&json!({ "dataset": "loans" })).unwrap();
        assert_eq!(params.attributes(), vec!["overall".to_string()]);
    }
}
