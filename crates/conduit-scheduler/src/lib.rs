//! `conduit-scheduler`: turns job cadences into triggers and fires them.
//!
//! # Overview
//!
//! The [`planner::TriggerPlanner`] maps a job's start/end/repeat settings to
//! a [`types::TriggerSpec`] in the connector's time zone. The
//! [`engine::SchedulerEngine`] holds every registered trigger in memory,
//! polls on a fixed tick and hands due fires to a [`engine::TriggerHandler`]
//! on a bounded worker pool. [`manager::SchedulerManager`] is the single
//! entry point for creating, replacing, refreshing and re-running triggers.
//!
//! # Repeat units
//!
//! | Unit      | Behaviour                                                   |
//! |-----------|-------------------------------------------------------------|
//! | `NEVER`   | Single fire at the start date                               |
//! | `MINUTES` | Every N minutes of elapsed time                             |
//! | `HOURS`   | N = 1: every wall-clock hour; 1 < N < 24: fixed hours of day |
//! | `DAYS`    | Same local time every N days                                |
//! | `WEEKS`   | Same local time and weekday every N weeks                   |
//! | `MONTHS`  | Same local time every N months, clamped to month end        |

mod calendar;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod manager;
pub mod planner;
pub mod types;

pub use dispatch::JobDispatcher;
pub use engine::{Firing, Scheduler, SchedulerEngine, TriggerHandler, TriggerInfo};
pub use error::{Result, SchedulerError};
pub use manager::{RefreshSummary, SchedulerManager};
pub use planner::{PlanMode, TriggerPlanner};
pub use types::{system_clock, Clock, FireRule, MisfirePolicy, TriggerGroup, TriggerKey, TriggerSpec};
