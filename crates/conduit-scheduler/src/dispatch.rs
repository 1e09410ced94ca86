use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::types::{ExecutionKind, RemoteStatus};
use conduit_plugins::{ExecutionRequest, JobExecutionController};
use conduit_store::{JobRepository, RemoteExecutionRepository};
use tracing::{error, info, warn};

use crate::{
    engine::{Firing, TriggerHandler},
    types::TriggerGroup,
};

const OUTCOME_WRITE_ATTEMPTS: u32 = 3;
const OUTCOME_WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// Turns trigger fires into plugin executions.
///
/// Records are reloaded on every fire so edits made after registration are
/// honoured, and removed or deactivated jobs are skipped.
pub struct JobDispatcher {
    jobs: Arc<dyn JobRepository>,
    remote: Arc<dyn RemoteExecutionRepository>,
    controller: Arc<JobExecutionController>,
}

impl JobDispatcher {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        remote: Arc<dyn RemoteExecutionRepository>,
        controller: Arc<JobExecutionController>,
    ) -> Self {
        Self {
            jobs,
            remote,
            controller,
        }
    }

    async fn fire_job(&self, firing: Firing, kind: ExecutionKind) {
        let Ok(id) = firing.key.id.parse::<i64>() else {
            error!(trigger = %firing.key, "trigger id is not a job id");
            return;
        };
        let job = match self.jobs.find_by_id(id) {
            Ok(Some(job)) if job.active => job,
            Ok(Some(job)) => {
                info!(job_id = id, name = %job.name, "job deactivated since scheduling, skipped");
                return;
            }
            Ok(None) => {
                warn!(job_id = id, "job removed since scheduling, skipped");
                return;
            }
            Err(e) => {
                error!(job_id = id, error = %e, "failed to load job for fire");
                return;
            }
        };

        let request = ExecutionRequest {
            job_name: job.name,
            target_id: job.target_id,
            plugin_type: job.plugin_type,
            scheduled_fire_time: firing.scheduled_for,
            kind,
            remote_guid: None,
            parameters: None,
        };
        self.controller.execute(&request).await;
    }

    async fn fire_remote(&self, firing: Firing) {
        let guid = firing.key.id.as_str();
        let execution = match self.remote.find_by_guid(guid) {
            Ok(Some(execution)) if execution.status.is_pending() => execution,
            Ok(Some(execution)) => {
                info!(%guid, status = %execution.status, "remote execution already settled, skipped");
                return;
            }
            Ok(None) => {
                warn!(%guid, "remote execution removed since scheduling, skipped");
                return;
            }
            Err(e) => {
                error!(%guid, error = %e, "failed to load remote execution for fire");
                return;
            }
        };

        let request = ExecutionRequest {
            job_name: format!("{} ({})", execution.query_name, execution.guid),
            target_id: execution.query_name,
            plugin_type: execution.executor_plugin,
            scheduled_fire_time: firing.scheduled_for,
            kind: ExecutionKind::Remote,
            remote_guid: Some(execution.guid),
            parameters: execution.parameters,
        };
        let result = self.controller.execute(&request).await;
        let status = if result.is_success() {
            RemoteStatus::Success
        } else {
            RemoteStatus::Failed
        };
        self.persist_outcome(guid, status, &result.summary).await;
    }

    /// A record left ACCEPTED is re-registered on the next refresh and runs
    /// again, so the write is retried before giving up.
    async fn persist_outcome(&self, guid: &str, status: RemoteStatus, summary: &str) {
        for attempt in 1..=OUTCOME_WRITE_ATTEMPTS {
            match self.remote.update_status(guid, status, Some(summary)) {
                Ok(()) => return,
                Err(e) if attempt < OUTCOME_WRITE_ATTEMPTS => {
                    warn!(%guid, attempt, error = %e, "persisting remote execution outcome failed, retrying");
                    tokio::time::sleep(OUTCOME_WRITE_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(%guid, %status, error = %e, "remote execution outcome lost; it will run again on the next refresh");
                }
            }
        }
    }
}

#[async_trait]
impl TriggerHandler for JobDispatcher {
    async fn fire(&self, firing: Firing) {
        match firing.key.group {
            TriggerGroup::Scheduled => self.fire_job(firing, ExecutionKind::Scheduled).await,
            TriggerGroup::Rerun => self.fire_job(firing, ExecutionKind::ReRun).await,
            TriggerGroup::RemoteExecution => self.fire_remote(firing).await,
        }
    }
}
