use chrono::{Duration, Utc};
use conduit_core::types::{EventOutcome, EventResult};
use rusqlite::params;
use tracing::debug;

use crate::{
    db::{decode_ts, encode_ts, Database},
    error::{Result, StoreError},
};

const TABLE: &str = "event_results";

/// Append-only, retention-bounded record of outcomes.
pub trait EventLog: Send + Sync {
    fn append(&self, event: &EventResult) -> Result<()>;
    /// Most recent events first.
    fn recent(&self, limit: usize) -> Result<Vec<EventResult>>;
}

pub struct SqliteEventLog {
    db: Database,
    retention: Duration,
}

impl SqliteEventLog {
    pub fn new(db: Database, retention_days: u32) -> Self {
        Self {
            db,
            retention: Duration::days(i64::from(retention_days)),
        }
    }
}

impl EventLog for SqliteEventLog {
    fn append(&self, event: &EventResult) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {TABLE} (description, outcome, summary, detail, created_at, duration_ms)
                 VALUES (?1,?2,?3,?4,?5,?6)"
            ),
            params![
                event.description,
                event.outcome.to_string(),
                event.summary,
                event.detail,
                encode_ts(&event.created_at),
                i64::try_from(event.duration_ms).unwrap_or(i64::MAX),
            ],
        )?;

        let cutoff = encode_ts(&(Utc::now() - self.retention));
        let purged = conn.execute(
            &format!("DELETE FROM {TABLE} WHERE created_at < ?1"),
            [cutoff],
        )?;
        if purged > 0 {
            debug!(purged, "expired events removed");
        }
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<EventResult>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT description, outcome, summary, detail, created_at, duration_ms
             FROM {TABLE} ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(decode).collect()
    }
}

type RawEvent = (String, String, String, String, String, i64);

fn decode(raw: RawEvent) -> Result<EventResult> {
    let (description, outcome, summary, detail, created_at, duration_ms) = raw;
    let outcome: EventOutcome = outcome
        .parse()
        .map_err(|reason| StoreError::Corrupt { table: TABLE, reason })?;
    Ok(EventResult {
        description,
        outcome,
        summary,
        detail,
        created_at: decode_ts(TABLE, &created_at)?,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
    })
}
