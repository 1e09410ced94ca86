use conduit_core::types::{JobConfiguration, RepeatUnit};
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::{
    db::{decode_ts, encode_ts, Database},
    error::{Result, StoreError},
};

const TABLE: &str = "job_configurations";
const COLUMNS: &str =
    "id, name, plugin_type, target_id, start_date, end_date, repeat_unit, repeat_value, active";

/// Durable storage for [`JobConfiguration`] records.
pub trait JobRepository: Send + Sync {
    fn find_by_id(&self, id: i64) -> Result<Option<JobConfiguration>>;
    fn find_by_name(&self, name: &str) -> Result<Option<JobConfiguration>>;
    fn list(&self) -> Result<Vec<JobConfiguration>>;
    /// Insert when `job.id` is `None`, otherwise update. Returns the stored record.
    fn save(&self, job: &JobConfiguration) -> Result<JobConfiguration>;
    fn delete(&self, id: i64) -> Result<()>;
}

pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Raw column values, decoded outside the rusqlite row callback so that
/// decoding errors surface as [`StoreError::Corrupt`].
type RawJob = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<u32>,
    bool,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode(raw: RawJob) -> Result<JobConfiguration> {
    let (id, name, plugin_type, target_id, start, end, unit, repeat_value, active) = raw;
    let repeat_unit: RepeatUnit = unit
        .parse()
        .map_err(|reason| StoreError::Corrupt { table: TABLE, reason })?;
    Ok(JobConfiguration {
        id: Some(id),
        name,
        plugin_type,
        target_id,
        start_date: decode_ts(TABLE, &start)?,
        end_date: end.as_deref().map(|e| decode_ts(TABLE, e)).transpose()?,
        repeat_unit,
        repeat_value,
        active,
    })
}

impl JobRepository for SqliteJobStore {
    fn find_by_id(&self, id: i64) -> Result<Option<JobConfiguration>> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = ?1"),
                [id],
                read_row,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    fn find_by_name(&self, name: &str) -> Result<Option<JobConfiguration>> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM {TABLE} WHERE name = ?1"),
                [name],
                read_row,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    fn list(&self) -> Result<Vec<JobConfiguration>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM {TABLE} ORDER BY id"))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode).collect()
    }

    fn save(&self, job: &JobConfiguration) -> Result<JobConfiguration> {
        let conn = self.db.lock()?;
        let start = encode_ts(&job.start_date);
        let end = job.end_date.as_ref().map(encode_ts);
        let unit = job.repeat_unit.to_string();

        let id = match job.id {
            Some(id) => {
                let n = conn.execute(
                    &format!(
                        "UPDATE {TABLE} SET name=?1, plugin_type=?2, target_id=?3, start_date=?4,
                         end_date=?5, repeat_unit=?6, repeat_value=?7, active=?8
                         WHERE id=?9"
                    ),
                    params![
                        job.name,
                        job.plugin_type,
                        job.target_id,
                        start,
                        end,
                        unit,
                        job.repeat_value,
                        job.active,
                        id
                    ],
                )?;
                if n == 0 {
                    return Err(StoreError::NotFound {
                        kind: "job",
                        id: id.to_string(),
                    });
                }
                id
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO {TABLE}
                         (name, plugin_type, target_id, start_date, end_date,
                          repeat_unit, repeat_value, active)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)"
                    ),
                    params![
                        job.name,
                        job.plugin_type,
                        job.target_id,
                        start,
                        end,
                        unit,
                        job.repeat_value,
                        job.active
                    ],
                )?;
                let id = conn.last_insert_rowid();
                info!(job_id = id, name = %job.name, "job configuration created");
                id
            }
        };

        Ok(JobConfiguration {
            id: Some(id),
            ..job.clone()
        })
    }

    fn delete(&self, id: i64) -> Result<()> {
        let conn = self.db.lock()?;
        let n = conn.execute(&format!("DELETE FROM {TABLE} WHERE id = ?1"), [id])?;
        if n == 0 {
            return Err(StoreError::NotFound {
                kind: "job",
                id: id.to_string(),
            });
        }
        info!(job_id = id, "job configuration deleted");
        Ok(())
    }
}
