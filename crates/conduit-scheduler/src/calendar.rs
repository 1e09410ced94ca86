//! Wall-clock arithmetic in a configured time zone.
//!
//! Local times that do not exist (spring-forward gap) are shifted forward by
//! the length of the gap; local times that occur twice (fall-back overlap)
//! resolve to the earlier instant. Consecutive slots can therefore collapse
//! onto the same instant, so every search here returns the first slot that
//! is not before the requested time.

use chrono::{
    DateTime, Duration, LocalResult, Months, NaiveDateTime, Offset, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::types::{FireRule, IntervalUnit};

/// Upper bound on forward steps from an estimated slot index.
const MAX_SCAN: usize = 4096;

/// Map a local wall-clock time in `tz` to an instant.
pub(crate) fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Use the offset in force before the gap; the result lands as far
            // past the gap as `local` was into it.
            let before = tz
                .from_local_datetime(&(local - Duration::hours(3)))
                .earliest()?;
            let offset = i64::from(before.offset().fix().local_minus_utc());
            let utc = local - Duration::seconds(offset);
            Some(Utc.from_utc_datetime(&utc))
        }
    }
}

pub(crate) fn local_time(tz: Tz, t: DateTime<Utc>) -> NaiveDateTime {
    t.with_timezone(&tz).naive_local()
}

/// First slot of a repeating `rule` anchored at `origin` that is `>= t`.
pub(crate) fn first_slot_at_or_after(
    rule: FireRule,
    tz: Tz,
    origin: DateTime<Utc>,
    t: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match rule {
        FireRule::OneShot => (t <= origin).then_some(origin),
        FireRule::FixedInterval { unit, every } => interval_slot_at_or_after(unit, every, tz, origin, t),
        FireRule::HourSlots {
            every,
            first_hour,
            minute,
            second,
        } => hour_slot_at_or_after(every, first_hour, minute, second, tz, t),
    }
}

fn interval_slot(
    unit: IntervalUnit,
    every: u32,
    tz: Tz,
    origin: DateTime<Utc>,
    k: i64,
) -> Option<DateTime<Utc>> {
    let n = i64::from(every).checked_mul(k)?;
    let wall = |delta: Duration| resolve_local(tz, local_time(tz, origin).checked_add_signed(delta)?);
    match unit {
        IntervalUnit::Minutes => origin.checked_add_signed(Duration::try_minutes(n)?),
        IntervalUnit::Hours => wall(Duration::try_hours(n)?),
        IntervalUnit::Days => wall(Duration::try_days(n)?),
        IntervalUnit::Weeks => wall(Duration::try_weeks(n)?),
        IntervalUnit::Months => {
            let local = local_time(tz, origin);
            let date = local
                .date()
                .checked_add_months(Months::new(u32::try_from(n).ok()?))?;
            resolve_local(tz, date.and_time(local.time()))
        }
    }
}

/// Longest real duration one step of `unit` can take, in seconds.
fn max_step_secs(unit: IntervalUnit, every: u32) -> i64 {
    let unit_secs = match unit {
        IntervalUnit::Minutes => 60,
        IntervalUnit::Hours => 3_600,
        IntervalUnit::Days => 86_400,
        IntervalUnit::Weeks => 7 * 86_400,
        IntervalUnit::Months => 31 * 86_400,
    };
    unit_secs * i64::from(every.max(1))
}

fn interval_slot_at_or_after(
    unit: IntervalUnit,
    every: u32,
    tz: Tz,
    origin: DateTime<Utc>,
    t: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let elapsed = (t - origin).num_seconds();
    // Start a couple of steps early so DST offsets cannot push us past the
    // answer, then walk back in case the estimate still overshot.
    let mut k = (elapsed / max_step_secs(unit, every) - 2).max(0);
    while k > 0 && interval_slot(unit, every, tz, origin, k - 1)? >= t {
        k -= 1;
    }
    for _ in 0..MAX_SCAN {
        let slot = interval_slot(unit, every, tz, origin, k)?;
        if slot >= t {
            return Some(slot);
        }
        k += 1;
    }
    None
}

fn hour_slot_at_or_after(
    every: u32,
    first_hour: u32,
    minute: u32,
    second: u32,
    tz: Tz,
    t: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let every = every.max(1);
    // The previous local day is included for zones where `t` sits just after
    // midnight but the slot resolves before it.
    let mut date = local_time(tz, t).date().pred_opt()?;
    for _ in 0..4 {
        for hour in (first_hour..24).step_by(every as usize) {
            let slot = date
                .and_hms_opt(hour, minute, second)
                .and_then(|local| resolve_local(tz, local));
            if let Some(slot) = slot.filter(|slot| *slot >= t) {
                return Some(slot);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Local hour/minute/second of `t` in `tz`.
pub(crate) fn local_hms(tz: Tz, t: DateTime<Utc>) -> (u32, u32, u32) {
    let local = local_time(tz, t);
    (local.hour(), local.minute(), local.second())
}
