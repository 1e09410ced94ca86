use std::collections::HashMap;

use async_trait::async_trait;
use conduit_core::{
    config::TransferTarget,
    types::{EventOutcome, EventResult, RemoteQueryExecution},
};
use tracing::{info, warn};

use crate::{
    error::ExecutionError,
    plugin::{ExecutionRequest, JobPlugin},
    transfer::{needs_copy, ConnectionState, FileTransfer, LocalFileTransfer, Side},
};

pub const FILE_SYNC_PLUGIN: &str = "file-sync";

/// Mirrors new or changed files from a source directory into a destination.
///
/// The job's target id names an entry of `[transfer.targets]`.
pub struct FileSyncPlugin {
    targets: HashMap<String, TransferTarget>,
}

impl FileSyncPlugin {
    pub fn new(targets: HashMap<String, TransferTarget>) -> Self {
        Self { targets }
    }

    async fn sync(
        &self,
        job_name: &str,
        conn: &mut dyn FileTransfer,
    ) -> Result<EventResult, ExecutionError> {
        if conn.open().await? == ConnectionState::LockedOut {
            return Ok(EventResult::failed(
                job_name,
                "Destination is locked by another transfer",
            ));
        }

        let outcome = copy_changed(job_name, conn).await;
        // Close even when copying failed so the lock is released.
        if let Err(e) = conn.close().await {
            warn!(job = job_name, error = %e, "failed to close transfer connection");
        }
        outcome
    }
}

async fn copy_changed(
    job_name: &str,
    conn: &mut dyn FileTransfer,
) -> Result<EventResult, ExecutionError> {
    let source = conn.list(Side::Source).await?;
    let destination: HashMap<String, _> = conn
        .list(Side::Destination)
        .await?
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect();

    let stale: Vec<&str> = source
        .iter()
        .filter(|src| needs_copy(src, destination.get(&src.name)))
        .map(|src| src.name.as_str())
        .collect();

    if stale.is_empty() {
        return Ok(EventResult::success(
            job_name,
            format!("Up to date ({} files checked)", source.len()),
        ));
    }

    let mut copied = Vec::new();
    let mut failures = Vec::new();
    for name in stale {
        match conn.copy(name).await {
            Ok(_) => copied.push(name),
            Err(e) => failures.push(format!("{name}: {e}")),
        }
    }
    info!(job = job_name, copied = copied.len(), failed = failures.len(), "file sync pass finished");

    let summary = format!("Copied {} of {} files", copied.len(), copied.len() + failures.len());
    let mut detail = copied.join("\n");
    if failures.is_empty() {
        return Ok(EventResult::success(job_name, summary).with_detail(detail));
    }
    detail.push_str("\n\nFailed:\n");
    detail.push_str(&failures.join("\n"));
    Ok(EventResult::new(job_name, EventOutcome::Warnings, summary, detail))
}

#[async_trait]
impl JobPlugin for FileSyncPlugin {
    fn name(&self) -> &str {
        FILE_SYNC_PLUGIN
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<EventResult, ExecutionError> {
        let target = self
            .targets
            .get(&request.target_id)
            .ok_or_else(|| ExecutionError::UnknownTarget(request.target_id.clone()))?;
        let mut conn = LocalFileTransfer::new(&target.source, &target.destination);
        self.sync(&request.job_name, &mut conn).await
    }

    async fn validate_remote_query_execution(
        &self,
        request_name: &str,
        execution: &RemoteQueryExecution,
    ) -> EventResult {
        if self.targets.contains_key(&execution.query_name) {
            EventResult::success(request_name, "Accepted")
        } else {
            EventResult::failed(
                request_name,
                format!("Unknown transfer target '{}'", execution.query_name),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conduit_core::types::{ExecutionKind, RemoteStatus};
    use std::path::Path;

    fn plugin(src: &Path, dst: &Path) -> FileSyncPlugin {
        let mut targets = HashMap::new();
        targets.insert(
            "invoices".to_string(),
            TransferTarget {
                source: src.display().to_string(),
                destination: dst.display().to_string(),
            },
        );
        FileSyncPlugin::new(targets)
    }

    fn request(target: &str) -> ExecutionRequest {
        ExecutionRequest {
            job_name: "invoice-sync".into(),
            target_id: target.into(),
            plugin_type: FILE_SYNC_PLUGIN.into(),
            scheduled_fire_time: Utc::now(),
            kind: ExecutionKind::Scheduled,
            remote_guid: None,
            parameters: None,
        }
    }

    #[tokio::test]
    async fn copies_missing_files_then_reports_up_to_date() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("jan.csv"), "1,2,3").unwrap();
        std::fs::write(src.path().join("feb.csv"), "4,5,6").unwrap();
        let plugin = plugin(src.path(), dst.path());

        let first = plugin.execute(&request("invoices")).await.unwrap();
        assert_eq!(first.outcome, EventOutcome::Success);
        assert_eq!(first.summary, "Copied 2 of 2 files");
        assert_eq!(std::fs::read_to_string(dst.path().join("jan.csv")).unwrap(), "1,2,3");
        assert!(!dst.path().join(crate::transfer::LOCK_FILE_NAME).exists());

        let second = plugin.execute(&request("invoices")).await.unwrap();
        assert!(second.summary.starts_with("Up to date"));
    }

    #[tokio::test]
    async fn locked_destination_fails_the_run() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(dst.path().join(crate::transfer::LOCK_FILE_NAME), "").unwrap();

        let result = plugin(src.path(), dst.path())
            .execute(&request("invoices"))
            .await
            .unwrap();
        assert_eq!(result.outcome, EventOutcome::Failed);
        // The foreign lock must survive.
        assert!(dst.path().join(crate::transfer::LOCK_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn unknown_target_is_an_execution_error() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let err = plugin(src.path(), dst.path())
            .execute(&request("payroll"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownTarget(t) if t == "payroll"));
    }

    #[tokio::test]
    async fn remote_validation_checks_target_name() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let plugin = plugin(src.path(), dst.path());
        let mut execution = RemoteQueryExecution {
            guid: "abc".into(),
            connector_name: "plant-7".into(),
            query_name: "invoices".into(),
            execution_date: Utc::now(),
            parameters: None,
            status: RemoteStatus::Queued,
            result_message: None,
            executor_plugin: FILE_SYNC_PLUGIN.into(),
            processing_complete: false,
        };
        assert!(plugin
            .validate_remote_query_execution("abc", &execution)
            .await
            .is_success());

        execution.query_name = "payroll".into();
        assert!(!plugin
            .validate_remote_query_execution("abc", &execution)
            .await
            .is_success());
    }
}
