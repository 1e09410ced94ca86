use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness check, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("CONDUIT_GIT_SHA"),
        "started_at": state.started_at,
        "triggers": state.manager.scheduler().triggers().len(),
        "remote_enabled": state.config.remote.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{body_json, send, test_app};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn reports_trigger_count() {
        let app = test_app();
        let resp = send(&app, Method::GET, "/health", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["triggers"], 0);
        assert_eq!(body["remote_enabled"], false);
    }
}
