use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConduitError, Result};

/// Maximum length (in characters) of an [`EventResult`] summary.
pub const SUMMARY_MAX_CHARS: usize = 255;
/// Maximum length (in characters) of an [`EventResult`] detailed message.
pub const DETAIL_MAX_CHARS: usize = 32_700;

/// Unit of a job's repeat cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatUnit {
    Never,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl fmt::Display for RepeatUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepeatUnit::Never => "NEVER",
            RepeatUnit::Minutes => "MINUTES",
            RepeatUnit::Hours => "HOURS",
            RepeatUnit::Days => "DAYS",
            RepeatUnit::Weeks => "WEEKS",
            RepeatUnit::Months => "MONTHS",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RepeatUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NEVER" => Ok(RepeatUnit::Never),
            "MINUTES" => Ok(RepeatUnit::Minutes),
            "HOURS" => Ok(RepeatUnit::Hours),
            "DAYS" => Ok(RepeatUnit::Days),
            "WEEKS" => Ok(RepeatUnit::Weeks),
            "MONTHS" => Ok(RepeatUnit::Months),
            other => Err(format!("unknown repeat unit: {other}")),
        }
    }
}

/// When a job runs and how often it repeats.
///
/// Either taken from a persisted [`JobConfiguration`] or assembled ad hoc
/// (e.g. by a re-run request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub repeat_unit: RepeatUnit,
    pub repeat_value: Option<u32>,
}

impl Cadence {
    /// Reject a repeating cadence without a positive repeat value.
    pub fn validate(&self) -> Result<()> {
        if self.repeat_unit != RepeatUnit::Never && !self.repeat_value.is_some_and(|v| v > 0) {
            return Err(ConduitError::InvalidRepeat {
                unit: self.repeat_unit,
                value: self.repeat_value,
            });
        }
        Ok(())
    }

    /// The positive repeat count, or `None` for `NEVER`.
    pub fn every(&self) -> Option<u32> {
        match self.repeat_unit {
            RepeatUnit::Never => None,
            _ => self.repeat_value.filter(|v| *v > 0),
        }
    }
}

/// A named, schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfiguration {
    /// Persisted row id; `None` until the record has been saved.
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    /// Registry key of the plugin that executes this job.
    pub plugin_type: String,
    /// Opaque identifier handed to the plugin (e.g. a transfer target name).
    pub target_id: String,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub repeat_unit: RepeatUnit,
    #[serde(default)]
    pub repeat_value: Option<u32>,
    #[serde(default = "bool_true")]
    pub active: bool,
}

fn bool_true() -> bool {
    true
}

impl JobConfiguration {
    pub fn cadence(&self) -> Cadence {
        Cadence {
            start: self.start_date,
            end: self.end_date,
            repeat_unit: self.repeat_unit,
            repeat_value: self.repeat_value,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConduitError::Config("job name must not be empty".into()));
        }
        if self.plugin_type.trim().is_empty() {
            return Err(ConduitError::Config(format!(
                "job '{}' has no plugin type",
                self.name
            )));
        }
        self.cadence().validate()
    }
}

/// Lifecycle of a remotely issued execution request.
///
/// `Queued → Accepted → {Success, Failed}`, or `Queued → Failed` when the
/// request is rejected by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Queued,
    Accepted,
    Success,
    Failed,
}

impl RemoteStatus {
    /// SUCCESS and FAILED are terminal and must be reported back upstream.
    pub fn is_final(&self) -> bool {
        matches!(self, RemoteStatus::Success | RemoteStatus::Failed)
    }

    /// QUEUED and ACCEPTED still need a trigger.
    pub fn is_pending(&self) -> bool {
        matches!(self, RemoteStatus::Queued | RemoteStatus::Accepted)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteStatus::Queued => "QUEUED",
            RemoteStatus::Accepted => "ACCEPTED",
            RemoteStatus::Success => "SUCCESS",
            RemoteStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RemoteStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(RemoteStatus::Queued),
            "ACCEPTED" => Ok(RemoteStatus::Accepted),
            "SUCCESS" => Ok(RemoteStatus::Success),
            "FAILED" => Ok(RemoteStatus::Failed),
            other => Err(format!("unknown remote status: {other}")),
        }
    }
}

/// Local mirror of a job-run request owned by the remote system.
///
/// The GUID is the identity: two requests with the same GUID are the same
/// logical entity whatever their other fields say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteQueryExecution {
    pub guid: String,
    pub connector_name: String,
    pub query_name: String,
    pub execution_date: DateTime<Utc>,
    pub parameters: Option<String>,
    pub status: RemoteStatus,
    pub result_message: Option<String>,
    /// Plugin type that runs (and validated) this request.
    pub executor_plugin: String,
    /// True once the final status has been uploaded successfully.
    pub processing_complete: bool,
}

/// Outcome category of an [`EventResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    Success,
    Failed,
    Exception,
    Warnings,
}

impl EventOutcome {
    /// SUCCESS and WARNINGS end a retry loop.
    pub fn is_success(&self) -> bool {
        matches!(self, EventOutcome::Success | EventOutcome::Warnings)
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventOutcome::Success => "SUCCESS",
            EventOutcome::Failed => "FAILED",
            EventOutcome::Exception => "EXCEPTION",
            EventOutcome::Warnings => "WARNINGS",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EventOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(EventOutcome::Success),
            "FAILED" => Ok(EventOutcome::Failed),
            "EXCEPTION" => Ok(EventOutcome::Exception),
            "WARNINGS" => Ok(EventOutcome::Warnings),
            other => Err(format!("unknown event outcome: {other}")),
        }
    }
}

/// Outcome record of one execution attempt, validation, or reconciliation step.
///
/// Messages are clamped to [`SUMMARY_MAX_CHARS`] / [`DETAIL_MAX_CHARS`] on
/// construction. Only the description may change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResult {
    pub description: String,
    pub outcome: EventOutcome,
    pub summary: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl EventResult {
    pub fn new(
        description: impl Into<String>,
        outcome: EventOutcome,
        summary: impl AsRef<str>,
        detail: impl AsRef<str>,
    ) -> Self {
        Self {
            description: description.into(),
            outcome,
            summary: truncate_chars(summary.as_ref(), SUMMARY_MAX_CHARS),
            detail: truncate_chars(detail.as_ref(), DETAIL_MAX_CHARS),
            created_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn success(description: impl Into<String>, summary: impl AsRef<str>) -> Self {
        Self::new(description, EventOutcome::Success, summary, "")
    }

    pub fn failed(description: impl Into<String>, summary: impl AsRef<str>) -> Self {
        Self::new(description, EventOutcome::Failed, summary, "")
    }

    pub fn with_detail(mut self, detail: impl AsRef<str>) -> Self {
        self.detail = truncate_chars(detail.as_ref(), DETAIL_MAX_CHARS);
        self
    }

    pub fn with_duration(mut self, elapsed: std::time::Duration) -> Self {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Append `suffix` to the description, separated by a space.
    pub fn annotate(&mut self, suffix: &str) {
        if !suffix.is_empty() {
            self.description.push(' ');
            self.description.push_str(suffix);
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Why a job is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionKind {
    /// Operator-initiated; a human is waiting, so never retried.
    Manual,
    Scheduled,
    ReRun,
    Remote,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionKind::Manual => "Manual",
            ExecutionKind::Scheduled => "Scheduled",
            ExecutionKind::ReRun => "Re-run",
            ExecutionKind::Remote => "Remote",
        };
        f.write_str(s)
    }
}

/// Cut `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_owned(),
        None => s.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cadence(unit: RepeatUnit, value: Option<u32>) -> Cadence {
        Cadence {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
            end: None,
            repeat_unit: unit,
            repeat_value: value,
        }
    }

    #[test]
    fn repeating_cadence_requires_positive_value() {
        assert!(cadence(RepeatUnit::Days, None).validate().is_err());
        assert!(cadence(RepeatUnit::Hours, Some(0)).validate().is_err());
        assert!(cadence(RepeatUnit::Weeks, Some(2)).validate().is_ok());
    }

    #[test]
    fn never_cadence_ignores_value() {
        assert!(cadence(RepeatUnit::Never, None).validate().is_ok());
        assert_eq!(cadence(RepeatUnit::Never, Some(3)).every(), None);
    }

    #[test]
    fn summary_is_truncated_to_exact_bound() {
        let long = "s".repeat(SUMMARY_MAX_CHARS + 40);
        let ev = EventResult::failed("job", &long);
        assert_eq!(ev.summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn detail_is_truncated_to_exact_bound() {
        let long = "é".repeat(DETAIL_MAX_CHARS + 1);
        let ev = EventResult::success("job", "ok").with_detail(&long);
        assert_eq!(ev.detail.chars().count(), DETAIL_MAX_CHARS);
    }

    #[test]
    fn short_messages_untouched() {
        let ev = EventResult::new("job", EventOutcome::Warnings, "fine", "detail");
        assert_eq!(ev.summary, "fine");
        assert_eq!(ev.detail, "detail");
        assert!(ev.is_success());
    }

    #[test]
    fn annotate_appends_suffix() {
        let mut ev = EventResult::failed("nightly-sync", "boom");
        ev.annotate("(Retry 2)");
        assert_eq!(ev.description, "nightly-sync (Retry 2)");
    }

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            RemoteStatus::Queued,
            RemoteStatus::Accepted,
            RemoteStatus::Success,
            RemoteStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<RemoteStatus>().unwrap(), status);
        }
        assert!("queued".parse::<RemoteStatus>().is_ok());
    }
}
