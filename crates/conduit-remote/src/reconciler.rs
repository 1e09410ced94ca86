//! Periodic diff between the remote system's queue and the local mirror.
//!
//! A pass fetches the remote queue, deletes local records the remote side
//! has moved past, admits GUIDs it has never seen, and uploads every final
//! status not yet reported. Admission persists a record (ACCEPTED or FAILED)
//! before any trigger can fire for it, so a GUID is only ever executed once
//! however many passes see it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conduit_core::types::{EventResult, RemoteQueryExecution, RemoteStatus};
use conduit_plugins::PluginRegistry;
use conduit_scheduler::SchedulerManager;
use conduit_store::{EventLog, RemoteExecutionRepository};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    batch::StatusBatch,
    client::{RemoteClient, RemoteExecutionRecord},
    error::{RemoteError, Result},
};

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub fetched: usize,
    pub added: usize,
    pub rejected: usize,
    pub uploaded: usize,
    pub deleted: usize,
}

/// Shortest poll interval the run loop accepts.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct RemoteQueryReconciler {
    connector: String,
    executor_plugin: String,
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn RemoteExecutionRepository>,
    manager: Arc<SchedulerManager>,
    registry: Arc<PluginRegistry>,
    events: Arc<dyn EventLog>,
    interval: Duration,
}

impl RemoteQueryReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: impl Into<String>,
        executor_plugin: impl Into<String>,
        client: Arc<dyn RemoteClient>,
        store: Arc<dyn RemoteExecutionRepository>,
        manager: Arc<SchedulerManager>,
        registry: Arc<PluginRegistry>,
        events: Arc<dyn EventLog>,
        interval: Duration,
    ) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(
                interval_ms = interval.as_millis() as u64,
                "poll interval too short, raised to one second"
            );
        }
        Self {
            connector: connector.into(),
            executor_plugin: executor_plugin.into(),
            client,
            store,
            manager,
            registry,
            events,
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Reconcile every `interval` until `shutdown` broadcasts `true`.
    ///
    /// Passes run inline, so a slow pass delays the next one rather than
    /// overlapping it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(connector = %self.connector, interval_secs = self.interval.as_secs(), "remote reconciler started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(connector = %self.connector, error = %e, "reconciliation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("remote reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let run_id = Uuid::now_v7();
        let remote = match self.client.list_pending(&self.connector).await {
            Ok(records) => records,
            Err(e) => {
                self.record_failure("Fetching remote executions failed", &e);
                return Err(e);
            }
        };
        let local = self.store.list()?;
        let mut report = ReconcileReport {
            fetched: remote.len(),
            ..ReconcileReport::default()
        };

        let remote_guids: HashSet<&str> = remote.iter().filter_map(|r| r.guid.as_deref()).collect();
        let local_by_guid: HashMap<&str, &RemoteQueryExecution> =
            local.iter().map(|e| (e.guid.as_str(), e)).collect();

        for execution in local
            .iter()
            .filter(|e| e.processing_complete && !remote_guids.contains(e.guid.as_str()))
        {
            self.store.delete(&execution.guid)?;
            report.deleted += 1;
        }

        let mut outbox: Vec<RemoteQueryExecution> = local
            .iter()
            .filter(|e| !e.processing_complete && e.status.is_final())
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        for record in &remote {
            let Some(guid) = record.guid.as_deref().filter(|g| !g.trim().is_empty()) else {
                warn!(%run_id, query = ?record.query_name, "remote execution without a GUID skipped");
                continue;
            };
            if local_by_guid.contains_key(guid) || !seen.insert(guid) {
                continue;
            }
            let execution = self.admit(record, guid).await?;
            if execution.status == RemoteStatus::Failed {
                report.rejected += 1;
                outbox.push(execution);
            } else {
                report.added += 1;
            }
        }

        if !outbox.is_empty() {
            let batch = StatusBatch::new(&outbox);
            if let Err(e) = self.client.upload_status(&self.connector, &batch).await {
                self.record_failure("Uploading execution statuses failed", &e);
                return Err(e);
            }
            report.uploaded = self.store.mark_processing_complete(batch.guids())?;
        }

        info!(
            %run_id,
            connector = %self.connector,
            fetched = report.fetched,
            added = report.added,
            rejected = report.rejected,
            uploaded = report.uploaded,
            deleted = report.deleted,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    /// Validate, persist and (when valid) schedule a GUID seen for the first
    /// time. The returned record is ACCEPTED or FAILED.
    async fn admit(&self, record: &RemoteExecutionRecord, guid: &str) -> Result<RemoteQueryExecution> {
        let mut execution = RemoteQueryExecution {
            guid: guid.to_string(),
            connector_name: record
                .connector_name
                .clone()
                .unwrap_or_else(|| self.connector.clone()),
            query_name: record.query_name.clone().unwrap_or_default(),
            execution_date: record.execution_date.unwrap_or_else(Utc::now),
            parameters: record.parameters.clone(),
            status: RemoteStatus::Queued,
            result_message: None,
            executor_plugin: self.executor_plugin.clone(),
            processing_complete: false,
        };

        let rejection = self.validate(&execution).await;
        execution.status = match rejection {
            None => RemoteStatus::Accepted,
            Some(_) => RemoteStatus::Failed,
        };
        execution.result_message = rejection.clone();
        self.store.save(&execution)?;

        if let Some(reason) = rejection {
            warn!(%guid, %reason, "remote execution rejected");
            self.record(EventResult::failed(
                format!("Remote execution {guid}"),
                format!("Rejected: {reason}"),
            ));
            return Ok(execution);
        }

        if let Err(e) = self.manager.schedule_remote(&execution) {
            let reason = format!("Could not be scheduled: {e}");
            error!(%guid, error = %e, "accepted remote execution could not be scheduled");
            self.store
                .update_status(guid, RemoteStatus::Failed, Some(&reason))?;
            self.record(EventResult::failed(format!("Remote execution {guid}"), &reason));
            execution.status = RemoteStatus::Failed;
            execution.result_message = Some(reason);
        }
        Ok(execution)
    }

    /// Reason the request cannot run, or `None` when it may.
    async fn validate(&self, execution: &RemoteQueryExecution) -> Option<String> {
        if execution.query_name.trim().is_empty() {
            return Some("missing query name".into());
        }
        let plugin = match self.registry.resolve(&execution.executor_plugin) {
            Ok(plugin) => plugin,
            Err(e) => return Some(e.to_string()),
        };
        let verdict = plugin
            .validate_remote_query_execution(&execution.guid, execution)
            .await;
        (!verdict.is_success()).then_some(verdict.summary)
    }

    fn record_failure(&self, what: &str, e: &RemoteError) {
        error!(connector = %self.connector, error = %e, "{what}");
        self.record(EventResult::failed(
            format!("Remote reconciliation [{}]", self.connector),
            format!("{what}: {e}"),
        ));
    }

    fn record(&self, result: EventResult) {
        if let Err(e) = self.events.append(&result) {
            error!(description = %result.description, error = %e, "failed to append event");
        }
    }
}
