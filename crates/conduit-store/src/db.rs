use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Shared SQLite handle used by every repository.
///
/// Each repository call takes the lock for one short unit of work and
/// releases it before returning; nothing holds it across an await point.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and run schema migrations.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        init_db(&conn)?;
        info!(path, "database ready");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Initialise all connector tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_job_configurations_table(conn)?;
    create_remote_executions_table(conn)?;
    create_event_results_table(conn)?;
    Ok(())
}

fn create_job_configurations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS job_configurations (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT    NOT NULL UNIQUE,
            plugin_type   TEXT    NOT NULL,
            target_id     TEXT    NOT NULL,
            start_date    TEXT    NOT NULL,
            end_date      TEXT,
            repeat_unit   TEXT    NOT NULL,
            repeat_value  INTEGER,
            active        INTEGER NOT NULL DEFAULT 1
        );",
    )?;
    Ok(())
}

/// Keyed by the remotely issued GUID, never by a local id.
fn create_remote_executions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS remote_query_executions (
            guid                 TEXT    NOT NULL PRIMARY KEY,
            connector_name       TEXT    NOT NULL,
            query_name           TEXT    NOT NULL,
            execution_date       TEXT    NOT NULL,
            parameters           TEXT,
            status               TEXT    NOT NULL,
            result_message       TEXT,
            executor_plugin      TEXT    NOT NULL,
            processing_complete  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_remote_status
            ON remote_query_executions(status);",
    )?;
    Ok(())
}

fn create_event_results_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS event_results (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            description  TEXT    NOT NULL,
            outcome      TEXT    NOT NULL,
            summary      TEXT    NOT NULL,
            detail       TEXT    NOT NULL,
            created_at   TEXT    NOT NULL,
            duration_ms  INTEGER NOT NULL DEFAULT 0
        );
        -- retention purge: DELETE … WHERE created_at < ?
        CREATE INDEX IF NOT EXISTS idx_events_created
            ON event_results(created_at);",
    )?;
    Ok(())
}

/// Fixed-width UTC timestamp so that text comparison orders correctly.
pub(crate) fn encode_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn encoded_timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert!(encode_ts(&a) < encode_ts(&b));
        assert_eq!(decode_ts("t", &encode_ts(&a)).unwrap(), a);
    }
}
