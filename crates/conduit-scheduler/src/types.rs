use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::calendar;

/// Source of "now" for everything that compares against the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Namespace of a trigger. A record has at most one trigger per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerGroup {
    /// Regular cadence of a job configuration.
    Scheduled,
    /// Backfill of a past window for a job configuration.
    Rerun,
    /// One-off run of a remote query execution.
    RemoteExecution,
}

impl fmt::Display for TriggerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerGroup::Scheduled => "scheduled",
            TriggerGroup::Rerun => "rerun",
            TriggerGroup::RemoteExecution => "remote-execution",
        };
        f.write_str(s)
    }
}

/// Trigger identity: persisted record id within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TriggerKey {
    pub group: TriggerGroup,
    pub id: String,
}

impl TriggerKey {
    pub fn scheduled(job_id: i64) -> Self {
        Self {
            group: TriggerGroup::Scheduled,
            id: job_id.to_string(),
        }
    }

    pub fn rerun(job_id: i64) -> Self {
        Self {
            group: TriggerGroup::Rerun,
            id: job_id.to_string(),
        }
    }

    pub fn remote(guid: &str) -> Self {
        Self {
            group: TriggerGroup::RemoteExecution,
            id: guid.to_string(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.id)
    }
}

/// Calendar unit of a fixed-interval rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    /// Elapsed-time spacing; unaffected by DST.
    Minutes,
    /// Wall-clock spacing: the hour of day survives DST transitions.
    Hours,
    Days,
    Weeks,
    Months,
}

/// How fire times after the first one are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FireRule {
    /// Fire once at the trigger start.
    OneShot,
    /// Every `every` units, counted from the trigger origin.
    FixedInterval { unit: IntervalUnit, every: u32 },
    /// Daily wall-clock slots `first_hour, first_hour + every, …` (< 24) at
    /// `minute:second`.
    HourSlots {
        every: u32,
        first_hour: u32,
        minute: u32,
        second: u32,
    },
}

/// What to do with fire times that passed without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Run the late fire once, then continue from the next slot after now.
    Skip,
    /// Replay every missed slot in order.
    CatchUp,
}

/// Concrete trigger: when it starts, how it repeats, and when it stops.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    /// Anchor that repeat slots are counted from.
    pub origin: DateTime<Utc>,
    /// No fire happens before this instant.
    pub start: DateTime<Utc>,
    /// No fire happens after this instant.
    pub end: Option<DateTime<Utc>>,
    pub rule: FireRule,
    pub misfire: MisfirePolicy,
    /// Zone for wall-clock arithmetic.
    pub tz: Tz,
}

impl TriggerSpec {
    /// Single fire at `at`. Fires even if `at` has already passed.
    pub fn one_shot(at: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            origin: at,
            start: at,
            end: None,
            rule: FireRule::OneShot,
            misfire: MisfirePolicy::Skip,
            tz,
        }
    }

    pub fn is_repeating(&self) -> bool {
        !matches!(self.rule, FireRule::OneShot)
    }

    pub fn first_fire_time(&self) -> Option<DateTime<Utc>> {
        self.fire_time_at_or_after(self.start)
    }

    pub fn fire_time_at_or_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let t = t.max(self.start);
        let next = match self.rule {
            FireRule::OneShot => (t == self.start).then_some(self.start),
            rule => calendar::first_slot_at_or_after(rule, self.tz, self.origin, t),
        }?;
        match self.end {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    pub fn fire_time_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.fire_time_at_or_after(t + Duration::nanoseconds(1))
    }

    /// All fire times in `[from, to]`, in order.
    pub fn fire_times_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let mut next = self.fire_time_at_or_after(from);
        while let Some(at) = next.filter(|at| *at <= to) {
            out.push(at);
            next = self.fire_time_after(at);
        }
        out
    }
}
