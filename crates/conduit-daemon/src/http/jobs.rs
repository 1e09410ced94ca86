//! Job configuration endpoints.
//!
//! Writes go through the store first and then re-sync the job's trigger, so
//! the live trigger set follows durable state.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use conduit_core::{EventResult, JobConfiguration};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use crate::app::AppState;

#[derive(Serialize)]
pub struct UpsertResponse {
    pub job: JobConfiguration,
    /// False when the job is valid but has nothing left to fire.
    pub scheduled: bool,
}

#[derive(Deserialize)]
pub struct RerunRequest {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

fn load(state: &AppState, id: i64) -> Result<JobConfiguration, ApiError> {
    state
        .jobs
        .find_by_id(id)?
        .ok_or_else(|| ApiError::not_found(format!("job {id} not found")))
}

/// GET /jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<JobConfiguration>>, ApiError> {
    Ok(Json(state.jobs.list()?))
}

/// PUT /jobs: insert or update (by id, else by name) and reschedule.
/// Nothing is written unless the job could be scheduled.
pub async fn upsert_job(
    State(state): State<Arc<AppState>>,
    Json(mut job): Json<JobConfiguration>,
) -> Result<Json<UpsertResponse>, ApiError> {
    job.validate()?;
    state.manager.check_job(&job)?;
    if job.id.is_none() {
        job.id = state.jobs.find_by_name(&job.name)?.and_then(|existing| existing.id);
    }
    let saved = state.jobs.save(&job)?;
    let scheduled = state.manager.update_trigger(&saved)?;
    info!(job_id = ?saved.id, name = %saved.name, scheduled, "job upserted via admin API");
    Ok(Json(UpsertResponse {
        job: saved,
        scheduled,
    }))
}

/// DELETE /jobs/{id}: unschedule, then delete.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let job = load(&state, id)?;
    state.manager.remove_job(&job);
    state.jobs.delete(id)?;
    info!(job_id = id, name = %job.name, "job deleted via admin API");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /jobs/{id}/run: manual execution; waits for the result.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<EventResult>, ApiError> {
    let job = load(&state, id)?;
    Ok(Json(state.manager.run_job_now(&job).await))
}

/// POST /jobs/{id}/rerun: 202 when scheduled, 422 with the reason otherwise.
pub async fn rerun_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(window): Json<RerunRequest>,
) -> Result<(StatusCode, Json<EventResult>), ApiError> {
    let job = load(&state, id)?;
    let result = state.manager.rerun_job(&job, window.from, window.to);
    let status = if result.is_success() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}
