use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    types::{system_clock, Clock, FireRule, MisfirePolicy, TriggerKey, TriggerSpec},
};

/// One due fire handed to the [`TriggerHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub key: TriggerKey,
    /// The slot this fire belongs to, which may be in the past.
    pub scheduled_for: DateTime<Utc>,
}

/// Work to run when a trigger fires.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn fire(&self, firing: Firing);
}

/// Registration surface of the in-memory trigger table.
pub trait Scheduler: Send + Sync {
    /// Add a trigger, replacing any existing one under the same key.
    /// Returns the first fire time.
    fn register(&self, key: TriggerKey, spec: TriggerSpec) -> Result<DateTime<Utc>>;
    /// Remove a trigger. A fire already running is left to finish.
    fn unregister(&self, key: &TriggerKey) -> bool;
    fn exists(&self, key: &TriggerKey) -> bool;
    fn clear(&self);
    fn triggers(&self) -> Vec<TriggerInfo>;
}

/// Read-only view of a registered trigger.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    pub key: TriggerKey,
    pub next_fire: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub rule: FireRule,
    pub misfire: MisfirePolicy,
    pub running: bool,
}

struct Entry {
    spec: TriggerSpec,
    next_fire: Option<DateTime<Utc>>,
    running: bool,
    generation: u64,
}

/// Shortest tick the run loop accepts; smaller values are raised to it.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Fires registered triggers on a tick, running at most `max_concurrent`
/// handlers at once and at most one fire per key.
pub struct SchedulerEngine {
    table: Mutex<HashMap<TriggerKey, Entry>>,
    generation: AtomicU64,
    handler: Arc<dyn TriggerHandler>,
    workers: Arc<Semaphore>,
    tick: Duration,
    clock: Clock,
}

impl SchedulerEngine {
    pub fn new(handler: Arc<dyn TriggerHandler>, max_concurrent: usize, tick: Duration) -> Self {
        if tick < MIN_TICK {
            warn!(
                tick_ms = tick.as_millis() as u64,
                min_ms = MIN_TICK.as_millis() as u64,
                "tick too short, raised to minimum"
            );
        }
        Self {
            table: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            handler,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tick: tick.max(MIN_TICK),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn next_fire_time(&self, key: &TriggerKey) -> Option<DateTime<Utc>> {
        self.lock_table().get(key).and_then(|e| e.next_fire)
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler engine started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = (self.clock)();
                    self.dispatch_due(now);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn a handler task for every idle trigger due at `now`.
    pub fn dispatch_due(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let due: Vec<(TriggerKey, DateTime<Utc>, u64)> = {
            let mut table = self.lock_table();
            table
                .iter_mut()
                .filter_map(|(key, entry)| {
                    let at = entry.next_fire.filter(|at| *at <= now)?;
                    if entry.running {
                        return None;
                    }
                    entry.running = true;
                    Some((key.clone(), at, entry.generation))
                })
                .collect()
        };

        due.into_iter()
            .map(|(key, at, generation)| {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    let Ok(_permit) = Arc::clone(&engine.workers).acquire_owned().await else {
                        error!(trigger = %key, "worker pool closed");
                        return;
                    };
                    debug!(trigger = %key, scheduled_for = %at, "trigger fired");
                    engine
                        .handler
                        .fire(Firing {
                            key: key.clone(),
                            scheduled_for: at,
                        })
                        .await;
                    engine.complete(&key, generation, at);
                })
            })
            .collect()
    }

    /// Advance a trigger after its fire finished; drop it once exhausted.
    fn complete(&self, key: &TriggerKey, generation: u64, fired_at: DateTime<Utc>) {
        let now = (self.clock)();
        let mut table = self.lock_table();
        let Some(entry) = table.get_mut(key) else {
            return;
        };
        // Replaced while running: the new trigger has its own schedule.
        if entry.generation != generation {
            return;
        }
        entry.running = false;
        let after = match entry.spec.misfire {
            MisfirePolicy::CatchUp => fired_at,
            MisfirePolicy::Skip => fired_at.max(now),
        };
        entry.next_fire = entry.spec.fire_time_after(after);
        if entry.next_fire.is_none() {
            table.remove(key);
            debug!(trigger = %key, "trigger exhausted");
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<TriggerKey, Entry>> {
        self.table.lock().unwrap_or_else(|poisoned| {
            warn!("trigger table lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Scheduler for SchedulerEngine {
    fn register(&self, key: TriggerKey, spec: TriggerSpec) -> Result<DateTime<Utc>> {
        let first = spec
            .first_fire_time()
            .ok_or_else(|| SchedulerError::NoFireTimes { key: key.to_string() })?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.lock_table().insert(
            key.clone(),
            Entry {
                spec,
                next_fire: Some(first),
                running: false,
                generation,
            },
        );
        if previous.is_some() {
            debug!(trigger = %key, "trigger replaced");
        }
        Ok(first)
    }

    fn unregister(&self, key: &TriggerKey) -> bool {
        self.lock_table().remove(key).is_some()
    }

    fn exists(&self, key: &TriggerKey) -> bool {
        self.lock_table().contains_key(key)
    }

    fn clear(&self) {
        let mut table = self.lock_table();
        info!(count = table.len(), "clearing all triggers");
        table.clear();
    }

    fn triggers(&self) -> Vec<TriggerInfo> {
        let mut out: Vec<TriggerInfo> = self
            .lock_table()
            .iter()
            .map(|(key, entry)| TriggerInfo {
                key: key.clone(),
                next_fire: entry.next_fire,
                end: entry.spec.end,
                rule: entry.spec.rule,
                misfire: entry.spec.misfire,
                running: entry.running,
            })
            .collect();
        out.sort_by(|a, b| a.next_fire.cmp(&b.next_fire).then_with(|| a.key.id.cmp(&b.key.id)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntervalUnit;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<Firing>>,
    }

    #[async_trait]
    impl TriggerHandler for Recorder {
        async fn fire(&self, firing: Firing) {
            self.fired.lock().unwrap().push(firing);
        }
    }

    /// Blocks every fire until released.
    struct Gate {
        release: Notify,
    }

    #[async_trait]
    impl TriggerHandler for Gate {
        async fn fire(&self, _firing: Firing) {
            self.release.notified().await;
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn fixed_clock(at: DateTime<Utc>) -> Clock {
        Arc::new(move || at)
    }

    fn every_minutes(start: DateTime<Utc>, every: u32, misfire: MisfirePolicy) -> TriggerSpec {
        TriggerSpec {
            origin: start,
            start,
            end: None,
            rule: FireRule::FixedInterval {
                unit: IntervalUnit::Minutes,
                every,
            },
            misfire,
            tz: Tz::UTC,
        }
    }

    async fn drain(handles: Vec<JoinHandle<()>>) {
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn catch_up_trigger_replays_every_missed_slot() {
        let recorder = Arc::new(Recorder::default());
        let now = utc(2024, 1, 1, 1, 0);
        let engine = Arc::new(
            SchedulerEngine::new(recorder.clone(), 4, Duration::from_secs(1))
                .with_clock(fixed_clock(now)),
        );
        let mut spec = every_minutes(utc(2024, 1, 1, 0, 0), 20, MisfirePolicy::CatchUp);
        spec.end = Some(utc(2024, 1, 1, 0, 40));
        engine.register(TriggerKey::rerun(1), spec).unwrap();

        for _ in 0..5 {
            drain(engine.dispatch_due(now)).await;
        }

        let fired: Vec<_> = recorder
            .fired
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.scheduled_for)
            .collect();
        assert_eq!(
            fired,
            vec![utc(2024, 1, 1, 0, 0), utc(2024, 1, 1, 0, 20), utc(2024, 1, 1, 0, 40)]
        );
        assert!(!engine.exists(&TriggerKey::rerun(1)));
    }

    #[tokio::test]
    async fn skip_trigger_fires_once_then_moves_past_now() {
        let recorder = Arc::new(Recorder::default());
        let now = utc(2024, 1, 1, 1, 5);
        let engine = Arc::new(
            SchedulerEngine::new(recorder.clone(), 4, Duration::from_secs(1))
                .with_clock(fixed_clock(now)),
        );
        let key = TriggerKey::scheduled(1);
        engine
            .register(key.clone(), every_minutes(utc(2024, 1, 1, 0, 0), 20, MisfirePolicy::Skip))
            .unwrap();

        drain(engine.dispatch_due(now)).await;
        drain(engine.dispatch_due(now)).await;

        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
        assert_eq!(engine.next_fire_time(&key), Some(utc(2024, 1, 1, 1, 20)));
    }

    #[tokio::test]
    async fn running_trigger_is_not_fired_again() {
        let gate = Arc::new(Gate {
            release: Notify::new(),
        });
        let now = utc(2024, 1, 1, 1, 0);
        let engine = Arc::new(
            SchedulerEngine::new(gate.clone(), 4, Duration::from_secs(1))
                .with_clock(fixed_clock(now)),
        );
        let key = TriggerKey::rerun(9);
        engine
            .register(key.clone(), every_minutes(utc(2024, 1, 1, 0, 0), 1, MisfirePolicy::CatchUp))
            .unwrap();

        let first = engine.dispatch_due(now);
        assert_eq!(first.len(), 1);
        assert!(engine.dispatch_due(now).is_empty());
        assert!(engine.triggers()[0].running);

        gate.release.notify_one();
        drain(first).await;
        assert_eq!(engine.next_fire_time(&key), Some(utc(2024, 1, 1, 0, 1)));
    }

    #[tokio::test]
    async fn replaced_trigger_survives_completion_of_its_predecessor() {
        let gate = Arc::new(Gate {
            release: Notify::new(),
        });
        let now = utc(2024, 1, 1, 0, 0);
        let engine = Arc::new(
            SchedulerEngine::new(gate.clone(), 4, Duration::from_secs(1))
                .with_clock(fixed_clock(now)),
        );
        let key = TriggerKey::remote("abc");
        engine
            .register(key.clone(), TriggerSpec::one_shot(now, Tz::UTC))
            .unwrap();
        let running = engine.dispatch_due(now);

        let later = utc(2024, 1, 2, 0, 0);
        engine
            .register(key.clone(), TriggerSpec::one_shot(later, Tz::UTC))
            .unwrap();
        gate.release.notify_one();
        drain(running).await;

        assert_eq!(engine.next_fire_time(&key), Some(later));
    }

    #[tokio::test]
    async fn register_rejects_trigger_without_fire_times() {
        let engine = SchedulerEngine::new(Arc::new(Recorder::default()), 1, Duration::from_secs(1));
        let mut spec = every_minutes(utc(2024, 1, 1, 0, 0), 5, MisfirePolicy::Skip);
        spec.start = utc(2024, 1, 2, 0, 0);
        spec.end = Some(utc(2024, 1, 1, 12, 0));
        let err = engine.register(TriggerKey::scheduled(3), spec).unwrap_err();
        assert!(matches!(err, SchedulerError::NoFireTimes { .. }));
        assert!(engine.triggers().is_empty());
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let engine = Arc::new(SchedulerEngine::new(recorder.clone(), 1, Duration::from_millis(10)));
        engine
            .register(TriggerKey::remote("now"), TriggerSpec::one_shot(Utc::now(), Tz::UTC))
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&engine).run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
        assert!(!engine.exists(&TriggerKey::remote("now")));
    }

    #[tokio::test]
    async fn zero_tick_is_raised_instead_of_panicking() {
        let recorder = Arc::new(Recorder::default());
        let engine = Arc::new(SchedulerEngine::new(recorder.clone(), 1, Duration::ZERO));
        assert_eq!(engine.tick, MIN_TICK);
        engine
            .register(TriggerKey::remote("now"), TriggerSpec::one_shot(Utc::now(), Tz::UTC))
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&engine).run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
    }
}
