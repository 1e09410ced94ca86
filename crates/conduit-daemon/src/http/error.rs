use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use conduit_core::ConduitError;
use conduit_scheduler::SchedulerError;
use conduit_store::StoreError;
use serde_json::json;
use tracing::error;

/// Error body of every admin endpoint: `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: what.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

impl From<ConduitError> for ApiError {
    fn from(e: ConduitError) -> Self {
        Self::bad_request(e.code(), e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => Self::not_found(format!("{kind} {id} not found")),
            other => {
                error!(error = %other, "store failure in admin API");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "STORE_ERROR",
                    message: other.to_string(),
                }
            }
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(store) => store.into(),
            SchedulerError::Configuration(_) => Self::bad_request("INVALID_JOB", e.to_string()),
            SchedulerError::Validation(_) | SchedulerError::NoFireTimes { .. } => {
                Self::bad_request("REJECTED", e.to_string())
            }
        }
    }
}
