use axum::{extract::State, Json};
use conduit_scheduler::{RefreshSummary, TriggerInfo};
use std::sync::Arc;

use super::error::ApiError;
use crate::app::AppState;

/// GET /triggers: every registered trigger, soonest first.
pub async fn list_triggers(State(state): State<Arc<AppState>>) -> Json<Vec<TriggerInfo>> {
    Json(state.manager.scheduler().triggers())
}

/// POST /scheduler/refresh: rebuild all triggers from the database.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshSummary>, ApiError> {
    Ok(Json(state.manager.refresh_scheduled_jobs()?))
}
