use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use conduit_core::ConduitConfig;
use conduit_scheduler::SchedulerManager;
use conduit_store::{EventLog, JobRepository};

use crate::services::Services;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ConduitConfig,
    pub manager: Arc<SchedulerManager>,
    pub jobs: Arc<dyn JobRepository>,
    pub events: Arc<dyn EventLog>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ConduitConfig, services: &Services) -> Self {
        Self {
            config,
            manager: services.manager.clone(),
            jobs: services.jobs.clone(),
            events: services.events.clone(),
            started_at: Utc::now(),
        }
    }
}

/// Assemble the admin API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/jobs",
            get(crate::http::jobs::list_jobs).put(crate::http::jobs::upsert_job),
        )
        .route("/jobs/{id}", delete(crate::http::jobs::delete_job))
        .route("/jobs/{id}/run", post(crate::http::jobs::run_job))
        .route("/jobs/{id}/rerun", post(crate::http::jobs::rerun_job))
        .route("/triggers", get(crate::http::scheduler::list_triggers))
        .route("/scheduler/refresh", post(crate::http::scheduler::refresh))
        .route("/events", get(crate::http::events::recent_events))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
