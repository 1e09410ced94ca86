//! Router fixture shared by the handler tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response},
    Router,
};
use conduit_core::{ConduitConfig, EventResult};
use conduit_plugins::{ExecutionError, ExecutionRequest, JobPlugin, PluginRegistry};
use conduit_store::Database;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use crate::app::{build_router, AppState};
use crate::services::Services;

struct EchoPlugin;

#[async_trait]
impl JobPlugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<EventResult, ExecutionError> {
        Ok(EventResult::success(&request.job_name, request.target_id.as_str()))
    }

    fn supports_reruns(&self) -> bool {
        true
    }
}

/// A full router over an in-memory database. The engine loop is not started,
/// so registered triggers never fire.
pub(crate) fn test_app() -> Router {
    let config = ConduitConfig::default();
    let db = Database::open_in_memory().unwrap();
    let mut registry = PluginRegistry::new();
    registry.register_instance(Arc::new(EchoPlugin));
    let (_stop, rx) = watch::channel(false);
    let services = Services::build(&config, db, registry, rx).unwrap();
    build_router(Arc::new(AppState::new(config, &services)))
}

pub(crate) async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub(crate) async fn body_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}
