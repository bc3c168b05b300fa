//! Built-in job handlers used by the `jd` binary

mod analysis;
mod ingest;

use std::sync::Arc;
use std::time::Duration;

pub use analysis::{ANALYSIS_ENDPOINT, AnalysisHandler, AnalysisKind, AnalysisService};
pub use ingest::{IngestHandler, IngestParams};

use crate::worker::HandlerRegistry;

/// Simulated latency of one analysis call
const ANALYSIS_LATENCY: Duration = Duration::from_millis(50);

/// Registry with `ingest`, `bias-analysis` and `compliance-check`
pub fn builtin_registry() -> HandlerRegistry {
    builtin_registry_with(Arc::new(AnalysisService::new(ANALYSIS_LATENCY)))
}

/// Same as [`builtin_registry`] with a caller-supplied analysis service
pub fn builtin_registry_with(service: Arc<AnalysisService>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("ingest", IngestHandler)
        .register("bias-analysis", AnalysisHandler::new(AnalysisKind::Bias, service.clone()))
        .register("compliance-check", AnalysisHandler::new(AnalysisKind::Compliance, service));
    registry
}
