use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use conduit_core::types::{Cadence, RepeatUnit};

use crate::{
    calendar::{local_hms, local_time, resolve_local},
    error::{Result, SchedulerError},
    types::{FireRule, IntervalUnit, MisfirePolicy, TriggerSpec},
};

/// Whether a trigger drives the regular cadence or a backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Missed fires are skipped; a past start rolls forward to the next slot.
    Scheduled,
    /// Every slot in the window fires, missed or not.
    Rerun,
}

/// Translates job cadences into trigger specs in a fixed time zone.
#[derive(Debug, Clone, Copy)]
pub struct TriggerPlanner {
    tz: Tz,
}

impl TriggerPlanner {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// Build the trigger for `cadence` as seen at `now`.
    ///
    /// Returns `Ok(None)` when a scheduled trigger has no fire time left.
    pub fn plan(&self, cadence: &Cadence, mode: PlanMode, now: DateTime<Utc>) -> Result<Option<TriggerSpec>> {
        cadence.validate()?;
        let (rule, origin) = self.rule_for(cadence)?;
        let misfire = match mode {
            PlanMode::Scheduled => MisfirePolicy::Skip,
            PlanMode::Rerun => MisfirePolicy::CatchUp,
        };
        let mut spec = TriggerSpec {
            origin,
            start: origin,
            end: cadence.end,
            rule,
            misfire,
            tz: self.tz,
        };

        if mode == PlanMode::Scheduled && spec.is_repeating() && spec.start < now {
            match spec.fire_time_after(now) {
                Some(next) => spec.start = next,
                None => return Ok(None),
            }
        }
        Ok(spec.first_fire_time().map(|_| spec))
    }

    /// Build a catch-up trigger covering the cadence's slots in `[from, to]`.
    ///
    /// Slots before the cadence start or after its end never fire. Returns
    /// `Ok(None)` when no slot falls inside the window.
    pub fn plan_rerun(
        &self,
        cadence: &Cadence,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<TriggerSpec>> {
        if from > to {
            return Err(SchedulerError::Validation(format!(
                "re-run window starts ({from}) after it ends ({to})"
            )));
        }
        let Some(base) = self.plan(cadence, PlanMode::Rerun, from)? else {
            return Ok(None);
        };
        let end = cadence.end.map_or(to, |e| e.min(to));
        let Some(first) = base.fire_time_at_or_after(from).filter(|t| *t <= end) else {
            return Ok(None);
        };
        Ok(Some(TriggerSpec {
            start: first,
            end: Some(end),
            ..base
        }))
    }

    fn rule_for(&self, cadence: &Cadence) -> Result<(FireRule, DateTime<Utc>)> {
        let start = cadence.start;
        let Some(every) = cadence.every() else {
            return Ok((FireRule::OneShot, start));
        };
        let interval = |unit| FireRule::FixedInterval { unit, every };
        let planned = match cadence.repeat_unit {
            RepeatUnit::Never => (FireRule::OneShot, start),
            RepeatUnit::Minutes => (interval(IntervalUnit::Minutes), start),
            RepeatUnit::Hours if every >= 24 => {
                return Err(SchedulerError::Configuration(format!(
                    "an HOURS cadence repeats at most every 23 hours (got {every}); use DAYS instead"
                )));
            }
            RepeatUnit::Hours if every == 1 => (interval(IntervalUnit::Hours), start),
            RepeatUnit::Hours => self.hour_slots(start, every)?,
            RepeatUnit::Days => (interval(IntervalUnit::Days), start),
            RepeatUnit::Weeks => (interval(IntervalUnit::Weeks), start),
            RepeatUnit::Months => (interval(IntervalUnit::Months), start),
        };
        Ok(planned)
    }

    /// Hours-of-day slots `h0, h0 + every, …` where `h0` is the start hour
    /// rolled back by whole periods. The origin moves to `h0` on the start
    /// date, which may be earlier than the configured start.
    fn hour_slots(&self, start: DateTime<Utc>, every: u32) -> Result<(FireRule, DateTime<Utc>)> {
        let (hour, minute, second) = local_hms(self.tz, start);
        let first_hour = hour % every;
        let anchored = local_time(self.tz, start)
            .date()
            .and_hms_opt(first_hour, minute, second)
            .and_then(|local| resolve_local(self.tz, local))
            .ok_or_else(|| {
                SchedulerError::Configuration(format!("cannot anchor hourly slots for start {start}"))
            })?;
        let rule = FireRule::HourSlots {
            every,
            first_hour,
            minute,
            second,
        };
        Ok((rule, anchored))
    }
}
