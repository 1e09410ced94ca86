use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::types::{EventResult, ExecutionKind, RemoteQueryExecution};

use crate::error::ExecutionError;

/// Everything a plugin needs to run one invocation of a job.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Human-readable job (or remote query) name, used in logs and event descriptions.
    pub job_name: String,
    /// Opaque identifier interpreted by the plugin.
    pub target_id: String,
    /// Registry key of the plugin to run.
    pub plugin_type: String,
    /// The instant this run was scheduled for (not when it actually started).
    pub scheduled_fire_time: DateTime<Utc>,
    pub kind: ExecutionKind,
    /// GUID of the remote request being served. `None` for local jobs.
    pub remote_guid: Option<String>,
    /// Remote request parameters, passed through unparsed.
    pub parameters: Option<String>,
}

/// Common interface implemented by every job executor (file sync, data extract, …).
///
/// Implementations must be `Send + Sync` so one instance can serve concurrent
/// fires from the scheduler's worker pool.
#[async_trait]
pub trait JobPlugin: Send + Sync {
    /// Stable identifier, used as the registry key (e.g. `"file-sync"`).
    fn name(&self) -> &str;

    /// Run the job once.
    ///
    /// `Ok` carries the plugin's own verdict (which may be FAILED);
    /// `Err` means the plugin itself broke and is reported as EXCEPTION.
    async fn execute(&self, request: &ExecutionRequest) -> Result<EventResult, ExecutionError>;

    /// Whether a past date range may be replayed for jobs using this plugin.
    fn supports_reruns(&self) -> bool {
        false
    }

    /// Domain validation of a remote request before it is accepted.
    ///
    /// Anything other than SUCCESS/WARNINGS rejects the request.
    async fn validate_remote_query_execution(
        &self,
        request_name: &str,
        _execution: &RemoteQueryExecution,
    ) -> EventResult {
        EventResult::success(request_name, "Accepted")
    }
}
