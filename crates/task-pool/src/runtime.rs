use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use task_pool_core::{ExecSource, TaskId, WorkerId};

/// Outcome of one body invocation.
pub type BodyResult = std::result::Result<Value, String>;

/// A runnable execution body: one callable of one argument whose return
/// value or error becomes the task response.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(&self, payload: Value) -> BodyResult;
}

/// Resolves execution sources to runnable bodies.
///
/// This is the seam between the pool and whatever runtime actually hosts
/// user code. [`BodyRegistry`] is the in-process realization; out-of-process
/// runtimes implement the same contract.
#[async_trait]
pub trait ExecBackend: Send + Sync + 'static {
    async fn resolve(&self, source: &ExecSource) -> std::result::Result<Arc<dyn TaskBody>, String>;
}

/// Adapts an async closure into a [`TaskBody`].
pub struct FnBody<F>(F);

impl<F, Fut> FnBody<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = BodyResult> + Send,
{
    pub fn new(f: F) -> Self {
        FnBody(f)
    }
}

#[async_trait]
impl<F, Fut> TaskBody for FnBody<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = BodyResult> + Send,
{
    async fn run(&self, payload: Value) -> BodyResult {
        (self.0)(payload).await
    }
}

/// Body that returns its payload unchanged.
pub struct EchoBody;

#[async_trait]
impl TaskBody for EchoBody {
    async fn run(&self, payload: Value) -> BodyResult {
        Ok(payload)
    }
}

/// In-process [`ExecBackend`] keyed by source content.
///
/// A `Path` source resolves by its path string, an `Inline` source by the
/// inline text itself; both go through the same table.
pub struct BodyRegistry {
    bodies: RwLock<HashMap<String, Arc<dyn TaskBody>>>,
}

impl BodyRegistry {
    pub fn new() -> Self {
        BodyRegistry {
            bodies: RwLock::new(HashMap::new()),
        }
    }

    /// Register a body under a source key.
    pub fn register<B: TaskBody + 'static>(&self, key: impl Into<String>, body: B) {
        self.bodies.write().insert(key.into(), Arc::new(body));
    }

    pub fn has_body(&self, key: &str) -> bool {
        self.bodies.read().contains_key(key)
    }
}

impl Default for BodyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecBackend for BodyRegistry {
    async fn resolve(&self, source: &ExecSource) -> std::result::Result<Arc<dyn TaskBody>, String> {
        let key = source.content();
        self.bodies
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| format!("no body registered for {:?}", key))
    }
}

/// Work order shipped from the dispatcher to a worker context.
#[derive(Debug, Clone)]
pub(crate) struct ExecRequest {
    pub task_id: TaskId,
    pub payload: Value,
    pub exec_override: Option<ExecSource>,
}

/// Result code of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseCode {
    Success,
    Failed,
}

/// Completion report from a worker context.
#[derive(Debug, Clone)]
pub(crate) struct ExecResponse {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub code: ResponseCode,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Lifecycle traffic from worker contexts to the dispatcher.
#[derive(Debug, Clone)]
pub(crate) enum WorkerEvent {
    Response(ExecResponse),
    Error { worker_id: WorkerId, error: String },
    Exit { worker_id: WorkerId, task_id: Option<TaskId> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_resolve() {
        let registry = BodyRegistry::new();
        registry.register("echo", EchoBody);

        assert!(registry.has_body("echo"));
        assert!(!registry.has_body("unknown"));

        let body = registry
            .resolve(&ExecSource::Inline("echo".to_string()))
            .await
            .unwrap();
        let result = body.run(json!("hello")).await.unwrap();
        assert_eq!(result, json!("hello"));
    }

    #[tokio::test]
    async fn test_registry_resolves_path_by_content() {
        let registry = BodyRegistry::new();
        registry.register("bodies/echo", EchoBody);

        let body = registry
            .resolve(&ExecSource::Path("bodies/echo".to_string()))
            .await;
        assert!(body.is_ok());
    }

    #[tokio::test]
    async fn test_registry_missing_body() {
        let registry = BodyRegistry::new();
        let result = registry
            .resolve(&ExecSource::Inline("missing".to_string()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fn_body() {
        let body = FnBody::new(|payload: Value| async move {
            let n = payload.as_i64().ok_or("not a number")?;
            Ok(json!(n * 2))
        });

        assert_eq!(body.run(json!(21)).await.unwrap(), json!(42));
        assert!(body.run(json!("nope")).await.is_err());
    }
}
