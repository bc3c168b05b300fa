//! Job handler trait and the registry keyed by job type

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::domain::JobError;

use super::context::JobContext;

/// Processing logic for one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Submission-time payload check; an error rejects the job before creation
    fn validate(&self, _payload: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Execute one attempt
    async fn run(&self, payload: Value, ctx: JobContext) -> Result<Value, JobError>;
}

/// Adapter that lets a closure act as a handler
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    async fn run(&self, payload: Value, ctx: JobContext) -> Result<Value, JobError> {
        (self.f)(payload, ctx).await
    }
}

/// Function table of handlers keyed by job type
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the type
    pub fn register(&mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) -> &mut Self {
        let job_type = job_type.into();
        debug!(%job_type, "HandlerRegistry::register: called");
        self.handlers.insert(job_type, Arc::new(handler));
        self
    }

    /// Register a closure as a handler
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.register(job_type, FnHandler { f })
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered types with their descriptions, sorted by type
    pub fn types(&self) -> Vec<(String, String)> {
        let mut types: Vec<_> = self
            .handlers
            .iter()
            .map(|(name, handler)| (name.clone(), handler.description().to_string()))
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Strict;

    #[async_trait]
    impl JobHandler for Strict {
        fn description(&self) -> &str {
            "requires a dataset"
        }

        fn validate(&self, payload: &Value) -> Result<(), String> {
            payload
                .get("dataset")
                .map(|_| ())
                .ok_or_else(|| "missing dataset".to_string())
        }

        async fn run(&self, _payload: Value, _ctx: JobContext) -> Result<Value, JobError> {
            Ok(json!(null))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("strict", Strict)
            .register_fn("echo", |payload, _ctx| async move { Ok(payload) });

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());

        let types = registry.types();
        assert_eq!(types[0].0, "echo");
        assert_eq!(types[1], ("strict".to_string(), "requires a dataset".to_string()));
    }

    #[test]
    fn test_validate_hook() {
        let mut registry = HandlerRegistry::new();
        registry.register("strict", Strict);
        let handler = registry.get("strict").unwrap();
        assert!(handler.validate(&json!({"dataset": "d"})).is_ok());
        assert_eq!(handler.validate(&json!({})).unwrap_err(), "missing dataset");
    }
}
