use std::collections::HashMap;

use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::JobConfiguration;

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Top-level config (conduit.toml + CONDUIT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConduitConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Remote query execution. Reconciliation is disabled when absent.
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Jobs imported (upserted by name) on startup.
    #[serde(default)]
    pub jobs: Vec<JobConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone used for wall-clock cadences (e.g. "Europe/London").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Size of the shared worker pool.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl SchedulerConfig {
    pub fn time_zone(&self) -> crate::error::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| crate::error::ConduitError::InvalidTimeZone(self.timezone.clone()))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// Retry policy for non-manual executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Event rows older than this are purged after every insert.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Name this connector is registered under on the remote side.
    pub connector_name: String,
    pub base_url: String,
    pub api_token: Option<String>,
    /// Plugin type that validates and runs remote requests.
    pub executor_plugin: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Named sync targets, referenced by a job's `target_id`.
    #[serde(default)]
    pub targets: HashMap<String, TransferTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTarget {
    pub source: String,
    pub destination: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_interval_secs() -> u64 {
    DEFAULT_RETRY_INTERVAL_SECS
}
fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conduit/conduit.db", home)
}

impl ConduitConfig {
    /// Load config from a TOML file with CONDUIT_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CONDUIT_EXECUTION__MAX_RETRIES=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::ConduitError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CONDUIT_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conduit/conduit.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepeatUnit;

    #[test]
    fn parses_full_document() {
        let toml = r#"
            [scheduler]
            timezone = "America/New_York"
            max_concurrent_jobs = 8

            [execution]
            max_retries = 5

            [remote]
            connector_name = "plant-7"
            base_url = "https://cloud.example.com/api"
            executor_plugin = "file-sync"

            [transfer.targets.invoices]
            source = "/srv/out"
            destination = "/mnt/share/in"

            [[jobs]]
            name = "invoice-sync"
            plugin_type = "file-sync"
            target_id = "invoices"
            start_date = "2024-01-01T05:00:00Z"
            repeat_unit = "DAYS"
            repeat_value = 1
        "#;
        let config: ConduitConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .unwrap();

        assert_eq!(config.scheduler.max_concurrent_jobs, 8);
        assert_eq!(config.scheduler.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(config.execution.max_retries, 5);
        assert_eq!(
            config.execution.retry_interval_secs,
            DEFAULT_RETRY_INTERVAL_SECS
        );
        assert_eq!(config.scheduler.time_zone().unwrap(), chrono_tz::America::New_York);

        let remote = config.remote.unwrap();
        assert_eq!(remote.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.transfer.targets["invoices"].destination, "/mnt/share/in");

        let job = &config.jobs[0];
        assert_eq!(job.repeat_unit, RepeatUnit::Days);
        assert!(job.active);
        assert_eq!(job.id, None);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: ConduitConfig = Figment::new().merge(Toml::string("")).extract().unwrap();
        assert!(config.remote.is_none());
        assert!(config.jobs.is_empty());
        assert_eq!(config.events.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(config.http.port, DEFAULT_PORT);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let cfg = SchedulerConfig {
            timezone: "Mars/Olympus".into(),
            ..SchedulerConfig::default()
        };
        assert!(cfg.time_zone().is_err());
    }
}
