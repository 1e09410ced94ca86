use std::sync::Arc;

use chrono::{DateTime, Utc};
use conduit_core::types::{
    EventResult, ExecutionKind, JobConfiguration, RemoteQueryExecution, RepeatUnit,
};
use conduit_plugins::{ExecutionRequest, JobExecutionController};
use conduit_store::{EventLog, JobRepository, RemoteExecutionRepository};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    engine::Scheduler,
    error::{Result, SchedulerError},
    planner::{PlanMode, TriggerPlanner},
    types::{system_clock, Clock, TriggerKey, TriggerSpec},
};

/// Counts from one [`SchedulerManager::refresh_scheduled_jobs`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub jobs_scheduled: usize,
    /// Inactive, expired, or one-shot jobs whose time has passed.
    pub jobs_skipped: usize,
    pub remote_scheduled: usize,
    pub failed: usize,
}

/// Front door for everything that changes what is scheduled.
pub struct SchedulerManager {
    scheduler: Arc<dyn Scheduler>,
    planner: TriggerPlanner,
    jobs: Arc<dyn JobRepository>,
    remote: Arc<dyn RemoteExecutionRepository>,
    controller: Arc<JobExecutionController>,
    events: Arc<dyn EventLog>,
    clock: Clock,
}

impl SchedulerManager {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        planner: TriggerPlanner,
        jobs: Arc<dyn JobRepository>,
        remote: Arc<dyn RemoteExecutionRepository>,
        controller: Arc<JobExecutionController>,
        events: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            scheduler,
            planner,
            jobs,
            remote,
            controller,
            events,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Register the regular trigger for a saved job.
    ///
    /// `Ok(false)` means the job is valid but has nothing left to fire.
    /// Configuration errors are also appended to the event log.
    pub fn create_job(&self, cfg: &JobConfiguration) -> Result<bool> {
        self.try_create_job(cfg).inspect_err(|e| {
            if matches!(e, SchedulerError::Configuration(_)) {
                error!(job = %cfg.name, error = %e, "job cannot be scheduled");
                self.record(EventResult::failed(format!("{} [Scheduling]", cfg.name), e.to_string()));
            }
        })
    }

    fn try_create_job(&self, cfg: &JobConfiguration) -> Result<bool> {
        let id = cfg.id.ok_or_else(|| {
            SchedulerError::Configuration(format!("job '{}' has not been saved", cfg.name))
        })?;
        if !cfg.active {
            debug!(job_id = id, "inactive job not scheduled");
            return Ok(false);
        }
        self.check_job(cfg)?;

        let now = (self.clock)();
        if cfg.end_date.is_some_and(|end| end <= now) {
            debug!(job_id = id, "expired job not scheduled");
            return Ok(false);
        }
        if cfg.repeat_unit == RepeatUnit::Never && cfg.start_date <= now {
            debug!(job_id = id, "one-shot job already past its start, not scheduled");
            return Ok(false);
        }

        let Some(spec) = self.planner.plan(&cfg.cadence(), PlanMode::Scheduled, now)? else {
            debug!(job_id = id, "job has no fire time left");
            return Ok(false);
        };
        let first = self.scheduler.register(TriggerKey::scheduled(id), spec)?;
        info!(job_id = id, name = %cfg.name, first_fire = %first, "job scheduled");
        Ok(true)
    }

    /// Reject a configuration that could never be scheduled: invalid repeat
    /// settings, an unregistered plugin type, or a cadence with no trigger
    /// equivalent. Needs no saved id, so it can gate a write.
    pub fn check_job(&self, cfg: &JobConfiguration) -> Result<()> {
        cfg.validate()?;
        if !self.controller.registry().contains(&cfg.plugin_type) {
            return Err(SchedulerError::Configuration(format!(
                "job '{}' uses unknown plugin type '{}'",
                cfg.name, cfg.plugin_type
            )));
        }
        self.planner
            .plan(&cfg.cadence(), PlanMode::Scheduled, (self.clock)())
            .map(|_| ())
    }

    /// Replace the job's regular trigger with one built from `cfg`.
    pub fn update_trigger(&self, cfg: &JobConfiguration) -> Result<bool> {
        self.remove_job(cfg);
        self.create_job(cfg)
    }

    /// Drop the job's regular trigger. Returns whether one existed.
    pub fn remove_job(&self, cfg: &JobConfiguration) -> bool {
        let Some(id) = cfg.id else {
            return false;
        };
        let removed = self.scheduler.unregister(&TriggerKey::scheduled(id));
        if removed {
            info!(job_id = id, name = %cfg.name, "job unscheduled");
        }
        removed
    }

    /// Rebuild the whole trigger table from persisted state.
    ///
    /// In-flight re-runs are dropped along with everything else.
    pub fn refresh_scheduled_jobs(&self) -> Result<RefreshSummary> {
        self.scheduler.clear();
        let mut summary = RefreshSummary::default();

        for job in self.jobs.list()? {
            match self.create_job(&job) {
                Ok(true) => summary.jobs_scheduled += 1,
                Ok(false) => summary.jobs_skipped += 1,
                Err(_) => summary.failed += 1,
            }
        }

        for execution in self.remote.list()? {
            if !execution.status.is_pending() {
                continue;
            }
            match self.schedule_remote(&execution) {
                Ok(()) => summary.remote_scheduled += 1,
                Err(e) => {
                    error!(guid = %execution.guid, error = %e, "remote execution cannot be scheduled");
                    summary.failed += 1;
                }
            }
        }

        info!(
            jobs = summary.jobs_scheduled,
            skipped = summary.jobs_skipped,
            remote = summary.remote_scheduled,
            failed = summary.failed,
            "scheduled jobs refreshed"
        );
        Ok(summary)
    }

    /// Backfill every slot of the job's cadence within `[from, to]`.
    ///
    /// Always returns an event (also appended to the log): SUCCESS when the
    /// re-run was scheduled, FAILED with the reason otherwise.
    pub fn rerun_job(&self, cfg: &JobConfiguration, from: DateTime<Utc>, to: DateTime<Utc>) -> EventResult {
        let description = format!("{} [{}]", cfg.name, ExecutionKind::ReRun);
        let outcome = self
            .try_rerun(cfg, from, to)
            .map(|spec| {
                let window_end = spec.end.unwrap_or(to);
                format!("Re-run scheduled from {} to {}", spec.start, window_end)
            });
        let result = match outcome {
            Ok(summary) => {
                info!(job = %cfg.name, %from, %to, "re-run scheduled");
                EventResult::success(description, summary)
            }
            Err(e) => {
                warn!(job = %cfg.name, %from, %to, error = %e, "re-run rejected");
                EventResult::failed(description, e.to_string())
            }
        };
        self.record(result.clone());
        result
    }

    fn try_rerun(&self, cfg: &JobConfiguration, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<TriggerSpec> {
        let id = cfg.id.ok_or_else(|| {
            SchedulerError::Configuration(format!("job '{}' has not been saved", cfg.name))
        })?;
        if to > (self.clock)() {
            return Err(SchedulerError::Validation("re-run end date is in the future".into()));
        }
        if from > to {
            return Err(SchedulerError::Validation("re-run start date is after its end date".into()));
        }
        let key = TriggerKey::rerun(id);
        if self.scheduler.exists(&key) {
            return Err(SchedulerError::Validation(
                "a re-run is already in progress for this job".into(),
            ));
        }
        let plugin = self
            .controller
            .registry()
            .resolve(&cfg.plugin_type)
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?;
        if !plugin.supports_reruns() {
            return Err(SchedulerError::Validation(format!(
                "plugin '{}' does not support re-runs",
                cfg.plugin_type
            )));
        }
        let spec = self
            .planner
            .plan_rerun(&cfg.cadence(), from, to)?
            .ok_or_else(|| {
                SchedulerError::Validation(format!("job was not due to run between {from} and {to}"))
            })?;
        self.scheduler.register(key, spec.clone())?;
        Ok(spec)
    }

    /// Execute the job immediately, outside any trigger, without retries.
    pub async fn run_job_now(&self, cfg: &JobConfiguration) -> EventResult {
        let request = ExecutionRequest {
            job_name: cfg.name.clone(),
            target_id: cfg.target_id.clone(),
            plugin_type: cfg.plugin_type.clone(),
            scheduled_fire_time: (self.clock)(),
            kind: ExecutionKind::Manual,
            remote_guid: None,
            parameters: None,
        };
        self.controller.execute(&request).await
    }

    /// One-off trigger at the execution date, which may already have passed.
    pub fn schedule_remote(&self, execution: &RemoteQueryExecution) -> Result<()> {
        let spec = TriggerSpec::one_shot(execution.execution_date, self.planner.time_zone());
        let first = self
            .scheduler
            .register(TriggerKey::remote(&execution.guid), spec)?;
        info!(guid = %execution.guid, query = %execution.query_name, first_fire = %first, "remote execution scheduled");
        Ok(())
    }

    fn record(&self, result: EventResult) {
        if let Err(e) = self.events.append(&result) {
            error!(description = %result.description, error = %e, "failed to append event");
        }
    }
}
