use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::{
    config::ExecutionConfig,
    types::{EventOutcome, EventResult, ExecutionKind},
};
use conduit_store::EventLog;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{plugin::ExecutionRequest, registry::PluginRegistry};

/// How often a failed non-manual execution is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl From<&ExecutionConfig> for RetryPolicy {
    fn from(cfg: &ExecutionConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_interval: Duration::from_secs(cfg.retry_interval_secs),
        }
    }
}

/// Runs one logical job invocation: resolve, execute, retry, log.
///
/// Every attempt is appended to the event log; the caller receives exactly
/// one result, the last attempt's.
pub struct JobExecutionController {
    registry: Arc<PluginRegistry>,
    events: Arc<dyn EventLog>,
    policy: RetryPolicy,
    /// When set, flipping to `true` interrupts a pending back-off.
    shutdown: Option<watch::Receiver<bool>>,
}

impl JobExecutionController {
    pub fn new(registry: Arc<PluginRegistry>, events: Arc<dyn EventLog>, policy: RetryPolicy) -> Self {
        Self {
            registry,
            events,
            policy,
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> EventResult {
        let kind_suffix = format!("[{}]", request.kind);

        let plugin = match self.registry.resolve(&request.plugin_type) {
            Ok(plugin) => plugin,
            Err(e) => {
                // Not retryable: the job is misconfigured, not unlucky.
                error!(job = %request.job_name, plugin = %request.plugin_type, error = %e, "plugin resolution failed");
                let mut result = EventResult::failed(&request.job_name, e.to_string());
                result.annotate(&kind_suffix);
                self.record(&result);
                return result;
            }
        };

        let max_retries = match request.kind {
            ExecutionKind::Manual => 0,
            _ => self.policy.max_retries,
        };

        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let mut result = match plugin.execute(request).await {
                Ok(result) => result,
                Err(e) => EventResult::new(
                    &request.job_name,
                    EventOutcome::Exception,
                    e.to_string(),
                    format!("{e:?}"),
                ),
            }
            .with_duration(started.elapsed());
            result.annotate(&kind_suffix);
            if attempt > 0 {
                result.annotate(&retry_suffix(attempt));
            }
            self.record(&result);

            if result.is_success() {
                info!(job = %request.job_name, kind = %request.kind, attempt, outcome = %result.outcome, "job finished");
                return result;
            }
            if attempt >= max_retries {
                warn!(job = %request.job_name, kind = %request.kind, attempt, outcome = %result.outcome, summary = %result.summary, "job failed, no retries left");
                return result;
            }

            attempt += 1;
            warn!(
                job = %request.job_name,
                attempt,
                max = max_retries,
                outcome = %result.outcome,
                retry_after_secs = self.policy.retry_interval.as_secs(),
                "job failed, retrying after back-off"
            );

            if !self.back_off().await {
                let mut interrupted = EventResult::failed(
                    &request.job_name,
                    "Retry back-off interrupted by shutdown",
                );
                interrupted.annotate(&kind_suffix);
                interrupted.annotate(&retry_suffix(attempt));
                self.record(&interrupted);
                return interrupted;
            }
        }
    }

    /// Wait out the retry interval. Returns `false` if shutdown interrupted it.
    async fn back_off(&self) -> bool {
        let Some(shutdown) = self.shutdown.as_ref() else {
            tokio::time::sleep(self.policy.retry_interval).await;
            return true;
        };

        let mut shutdown = shutdown.clone();
        let stop_requested = async move {
            loop {
                if *shutdown.borrow_and_update() {
                    return;
                }
                if shutdown.changed().await.is_err() {
                    // Sender gone: nobody can ask us to stop any more.
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(self.policy.retry_interval) => true,
            _ = stop_requested => false,
        }
    }

    fn record(&self, result: &EventResult) {
        if let Err(e) = self.events.append(result) {
            error!(description = %result.description, error = %e, "failed to append event");
        }
    }
}

fn retry_suffix(attempt: u32) -> String {
    format!("(Retry {attempt})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ExecutionError, plugin::JobPlugin};
    use async_trait::async_trait;
    use chrono::Utc;
    use conduit_store::{Database, SqliteEventLog};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails (or errors) until `succeed_on` attempts have been made.
    struct Flaky {
        calls: AtomicU32,
        succeed_on: Option<u32>,
        throw: bool,
    }

    #[async_trait]
    impl JobPlugin for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn execute(&self, req: &ExecutionRequest) -> Result<EventResult, ExecutionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.succeed_on.is_some_and(|s| n >= s) {
                return Ok(EventResult::success(&req.job_name, "done"));
            }
            if self.throw {
                return Err(ExecutionError::Failed("disk on fire".into()));
            }
            Ok(EventResult::failed(&req.job_name, "nope"))
        }
    }

    fn setup(
        plugin: Arc<Flaky>,
        max_retries: u32,
        retry_interval: Duration,
    ) -> (JobExecutionController, Arc<SqliteEventLog>) {
        let mut registry = PluginRegistry::new();
        registry.register_instance(plugin);
        let events = Arc::new(SqliteEventLog::new(Database::open_in_memory().unwrap(), 30));
        let controller = JobExecutionController::new(
            Arc::new(registry),
            events.clone(),
            RetryPolicy {
                max_retries,
                retry_interval,
            },
        );
        (controller, events)
    }

    fn flaky(succeed_on: Option<u32>, throw: bool) -> Arc<Flaky> {
        Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on,
            throw,
        })
    }

    fn request(kind: ExecutionKind, plugin_type: &str) -> ExecutionRequest {
        ExecutionRequest {
            job_name: "nightly".into(),
            target_id: "invoices".into(),
            plugin_type: plugin_type.into(),
            scheduled_fire_time: Utc::now(),
            kind,
            remote_guid: None,
            parameters: None,
        }
    }

    #[tokio::test]
    async fn always_failing_plugin_runs_initial_plus_retries() {
        let plugin = flaky(None, false);
        let (controller, events) = setup(plugin.clone(), 2, Duration::ZERO);

        let result = controller
            .execute(&request(ExecutionKind::Scheduled, "flaky"))
            .await;

        assert_eq!(plugin.calls.load(Ordering::SeqCst), 3);
        assert_eq!(events.recent(10).unwrap().len(), 3);
        assert_eq!(result.outcome, EventOutcome::Failed);
        assert!(result.description.ends_with("(Retry 2)"));
        assert!(result.description.contains("[Scheduled]"));
    }

    #[tokio::test]
    async fn manual_execution_never_retries() {
        let plugin = flaky(None, false);
        let (controller, events) = setup(plugin.clone(), 5, Duration::ZERO);

        let result = controller
            .execute(&request(ExecutionKind::Manual, "flaky"))
            .await;

        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.recent(10).unwrap().len(), 1);
        assert!(!result.description.contains("Retry"));
    }

    #[tokio::test]
    async fn plugin_error_becomes_exception_and_is_retried() {
        let plugin = flaky(Some(2), true);
        let (controller, events) = setup(plugin.clone(), 3, Duration::ZERO);

        let result = controller
            .execute(&request(ExecutionKind::Remote, "flaky"))
            .await;

        assert_eq!(result.outcome, EventOutcome::Success);
        assert!(result.description.ends_with("(Retry 1)"));
        let logged = events.recent(10).unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[1].outcome, EventOutcome::Exception);
        assert!(logged[1].summary.contains("disk on fire"));
    }

    #[tokio::test]
    async fn unknown_plugin_fails_without_retry() {
        let plugin = flaky(None, false);
        let (controller, events) = setup(plugin.clone(), 2, Duration::ZERO);

        let result = controller
            .execute(&request(ExecutionKind::Scheduled, "does-not-exist"))
            .await;

        assert_eq!(result.outcome, EventOutcome::Failed);
        assert!(result.summary.contains("Unknown plugin type"));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
        assert_eq!(events.recent(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_back_off_as_failed_attempt() {
        let plugin = flaky(None, false);
        let (controller, events) = setup(plugin.clone(), 3, Duration::from_secs(3600));
        let (stop_tx, stop_rx) = watch::channel(false);
        let controller = controller.with_shutdown(stop_rx);

        let run = tokio::spawn(async move {
            controller
                .execute(&request(ExecutionKind::Scheduled, "flaky"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        let result = run.await.unwrap();
        assert_eq!(result.outcome, EventOutcome::Failed);
        assert!(result.summary.contains("interrupted"));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.recent(10).unwrap().len(), 2);
    }
}
