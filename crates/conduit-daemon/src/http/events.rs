use axum::{
    extract::{Query, State},
    Json,
};
use conduit_core::EventResult;
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::app::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// GET /events?limit=N: most recent events first.
pub async fn recent_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventResult>>, ApiError> {
    let limit = query.limit.min(MAX_LIMIT);
    Ok(Json(state.events.recent(limit)?))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{body_json, send, test_app};
    use axum::http::Method;
    use serde_json::json;

    #[tokio::test]
    async fn lists_newest_first_with_limit() {
        let app = test_app();
        let body = body_json(
            send(
                &app,
                Method::PUT,
                "/jobs",
                Some(json!({
                    "name": "nightly",
                    "plugin_type": "echo",
                    "target_id": "ledger",
                    "start_date": "2024-01-01T05:00:00Z",
                    "repeat_unit": "NEVER"
                })),
            )
            .await,
        )
        .await;
        let id = body["job"]["id"].as_i64().unwrap();
        for _ in 0..3 {
            send(&app, Method::POST, &format!("/jobs/{id}/run"), None).await;
        }

        let events = body_json(send(&app, Method::GET, "/events?limit=2", None).await).await;
        assert_eq!(events.as_array().unwrap().len(), 2);
        assert_eq!(events[0]["description"], "nightly [Manual]");
    }
}
