use conduit_core::types::RemoteQueryExecution;
use serde::Serialize;

/// Column order of the status upload sheet.
pub const STATUS_COLUMNS: [&str; 6] = [
    "guid",
    "connector_name",
    "query_name",
    "execution_date",
    "status",
    "result_message",
];

/// One upload's worth of final statuses, laid out as a sheet: a header row
/// followed by one value row per execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBatch {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    #[serde(skip)]
    guids: Vec<String>,
}

impl StatusBatch {
    pub fn new(executions: &[RemoteQueryExecution]) -> Self {
        let rows = executions
            .iter()
            .map(|e| {
                vec![
                    e.guid.clone(),
                    e.connector_name.clone(),
                    e.query_name.clone(),
                    e.execution_date.to_rfc3339(),
                    e.status.to_string(),
                    e.result_message.clone().unwrap_or_default(),
                ]
            })
            .collect();
        Self {
            header: STATUS_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
            guids: executions.iter().map(|e| e.guid.clone()).collect(),
        }
    }

    /// GUIDs covered by this batch, in row order.
    pub fn guids(&self) -> &[String] {
        &self.guids
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
