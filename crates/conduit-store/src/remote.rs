use conduit_core::types::{RemoteQueryExecution, RemoteStatus};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use crate::{
    db::{decode_ts, encode_ts, Database},
    error::{Result, StoreError},
};

const TABLE: &str = "remote_query_executions";
const COLUMNS: &str = "guid, connector_name, query_name, execution_date, parameters, status,
                       result_message, executor_plugin, processing_complete";

/// Local mirror of remotely issued execution requests, keyed by GUID.
pub trait RemoteExecutionRepository: Send + Sync {
    fn find_by_guid(&self, guid: &str) -> Result<Option<RemoteQueryExecution>>;
    fn list(&self) -> Result<Vec<RemoteQueryExecution>>;
    /// Insert or replace the record with the same GUID.
    fn save(&self, execution: &RemoteQueryExecution) -> Result<()>;
    /// Record an execution outcome. Leaves `processing_complete` untouched.
    fn update_status(
        &self,
        guid: &str,
        status: RemoteStatus,
        result_message: Option<&str>,
    ) -> Result<()>;
    /// Flag every listed GUID as reported upstream, in one transaction.
    fn mark_processing_complete(&self, guids: &[String]) -> Result<usize>;
    fn delete(&self, guid: &str) -> Result<()>;
}

pub struct SqliteRemoteStore {
    db: Database,
}

impl SqliteRemoteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

type RawExecution = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    bool,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawExecution> {
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

fn decode(raw: RawExecution) -> Result<RemoteQueryExecution> {
    let (
        guid,
        connector_name,
        query_name,
        execution_date,
        parameters,
        status,
        result_message,
        executor_plugin,
        processing_complete,
    ) = raw;
    let status: RemoteStatus = status
        .parse()
        .map_err(|reason| StoreError::Corrupt { table: TABLE, reason })?;
    Ok(RemoteQueryExecution {
        guid,
        connector_name,
        query_name,
        execution_date: decode_ts(TABLE, &execution_date)?,
        parameters,
        status,
        result_message,
        executor_plugin,
        processing_complete,
    })
}

impl RemoteExecutionRepository for SqliteRemoteStore {
    fn find_by_guid(&self, guid: &str) -> Result<Option<RemoteQueryExecution>> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM {TABLE} WHERE guid = ?1"),
                [guid],
                read_row,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    fn list(&self) -> Result<Vec<RemoteQueryExecution>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {TABLE} ORDER BY execution_date"
        ))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode).collect()
    }

    fn save(&self, execution: &RemoteQueryExecution) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {TABLE} ({COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)"
            ),
            params![
                execution.guid,
                execution.connector_name,
                execution.query_name,
                encode_ts(&execution.execution_date),
                execution.parameters,
                execution.status.to_string(),
                execution.result_message,
                execution.executor_plugin,
                execution.processing_complete,
            ],
        )?;
        debug!(guid = %execution.guid, status = %execution.status, "remote execution saved");
        Ok(())
    }

    fn update_status(
        &self,
        guid: &str,
        status: RemoteStatus,
        result_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.lock()?;
        let n = conn.execute(
            &format!("UPDATE {TABLE} SET status = ?1, result_message = ?2 WHERE guid = ?3"),
            params![status.to_string(), result_message, guid],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                kind: "remote execution",
                id: guid.to_string(),
            });
        }
        info!(%guid, %status, "remote execution status updated");
        Ok(())
    }

    fn mark_processing_complete(&self, guids: &[String]) -> Result<usize> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let mut marked = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE {TABLE} SET processing_complete = 1 WHERE guid = ?1"
            ))?;
            for guid in guids {
                marked += stmt.execute([guid])?;
            }
        }
        tx.commit()?;
        Ok(marked)
    }

    fn delete(&self, guid: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(&format!("DELETE FROM {TABLE} WHERE guid = ?1"), [guid])?;
        debug!(%guid, "remote execution deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn execution(guid: &str) -> RemoteQueryExecution {
        RemoteQueryExecution {
            guid: guid.into(),
            connector_name: "plant-7".into(),
            query_name: "invoices".into(),
            execution_date: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            parameters: Some("{\"region\":\"eu\"}".into()),
            status: RemoteStatus::Accepted,
            result_message: None,
            executor_plugin: "file-sync".into(),
            processing_complete: false,
        }
    }

    fn store() -> SqliteRemoteStore {
        SqliteRemoteStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn save_is_keyed_by_guid() {
        let store = store();
        store.save(&execution("abc")).unwrap();
        let mut changed = execution("abc");
        changed.query_name = "orders".into();
        store.save(&changed).unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].query_name, "orders");
    }

    #[test]
    fn update_status_keeps_processing_flag() {
        let store = store();
        store.save(&execution("abc")).unwrap();
        store
            .update_status("abc", RemoteStatus::Success, Some("Copied 3 files"))
            .unwrap();

        let loaded = store.find_by_guid("abc").unwrap().unwrap();
        assert_eq!(loaded.status, RemoteStatus::Success);
        assert_eq!(loaded.result_message.as_deref(), Some("Copied 3 files"));
        assert!(!loaded.processing_complete);
    }

    #[test]
    fn update_status_of_unknown_guid_fails() {
        let store = store();
        assert!(matches!(
            store.update_status("nope", RemoteStatus::Failed, None),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn mark_processing_complete_flags_only_listed() {
        let store = store();
        store.save(&execution("a")).unwrap();
        store.save(&execution("b")).unwrap();

        let marked = store
            .mark_processing_complete(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(marked, 1);
        assert!(store.find_by_guid("a").unwrap().unwrap().processing_complete);
        assert!(!store.find_by_guid("b").unwrap().unwrap().processing_complete);
    }
}
