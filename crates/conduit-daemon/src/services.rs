use std::sync::Arc;
use std::time::Duration;

use conduit_core::ConduitConfig;
use conduit_plugins::{FileSyncPlugin, JobExecutionController, PluginRegistry, RetryPolicy};
use conduit_remote::{HttpRemoteClient, RemoteQueryReconciler};
use conduit_scheduler::{JobDispatcher, SchedulerEngine, SchedulerManager, TriggerPlanner};
use conduit_store::{Database, SqliteEventLog, SqliteJobStore, SqliteRemoteStore};
use tokio::sync::watch;
use tracing::info;

/// Every long-lived component of the connector, wired together over one
/// database handle.
pub struct Services {
    pub jobs: Arc<SqliteJobStore>,
    pub remote_store: Arc<SqliteRemoteStore>,
    pub events: Arc<SqliteEventLog>,
    pub registry: Arc<PluginRegistry>,
    pub engine: Arc<SchedulerEngine>,
    pub manager: Arc<SchedulerManager>,
}

/// Plugin types compiled into the daemon.
pub fn default_registry(config: &ConduitConfig) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register_instance(Arc::new(FileSyncPlugin::new(config.transfer.targets.clone())));
    registry
}

impl Services {
    pub fn build(
        config: &ConduitConfig,
        db: Database,
        registry: PluginRegistry,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let tz = config.scheduler.time_zone()?;
        let jobs = Arc::new(SqliteJobStore::new(db.clone()));
        let remote_store = Arc::new(SqliteRemoteStore::new(db.clone()));
        let events = Arc::new(SqliteEventLog::new(db, config.events.retention_days));
        info!(plugins = ?registry.plugin_types(), "plugin registry ready");
        let registry = Arc::new(registry);

        let controller = Arc::new(
            JobExecutionController::new(
                registry.clone(),
                events.clone(),
                RetryPolicy::from(&config.execution),
            )
            .with_shutdown(shutdown),
        );
        let dispatcher = Arc::new(JobDispatcher::new(
            jobs.clone(),
            remote_store.clone(),
            controller.clone(),
        ));
        let engine = Arc::new(SchedulerEngine::new(
            dispatcher,
            config.scheduler.max_concurrent_jobs,
            Duration::from_millis(config.scheduler.tick_interval_ms),
        ));
        let manager = Arc::new(SchedulerManager::new(
            engine.clone(),
            TriggerPlanner::new(tz),
            jobs.clone(),
            remote_store.clone(),
            controller,
            events.clone(),
        ));

        Ok(Self {
            jobs,
            remote_store,
            events,
            registry,
            engine,
            manager,
        })
    }

    /// The reconciler for `[remote]`, or `None` when it is not configured.
    pub fn reconciler(&self, config: &ConduitConfig) -> anyhow::Result<Option<RemoteQueryReconciler>> {
        let Some(remote) = config.remote.as_ref() else {
            return Ok(None);
        };
        let client = Arc::new(HttpRemoteClient::new(remote)?);
        Ok(Some(RemoteQueryReconciler::new(
            remote.connector_name.clone(),
            remote.executor_plugin.clone(),
            client,
            self.remote_store.clone(),
            self.manager.clone(),
            self.registry.clone(),
            self.events.clone(),
            Duration::from_secs(remote.poll_interval_secs),
        )))
    }
}
