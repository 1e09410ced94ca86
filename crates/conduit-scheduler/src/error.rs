use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job cannot be scheduled as configured (bad cadence, unknown
    /// plugin, missing id). Fatal for that job only.
    #[error("Invalid job configuration: {0}")]
    Configuration(String),

    /// The request was understood but refused (e.g. a re-run window in the
    /// future).
    #[error("Rejected: {0}")]
    Validation(String),

    /// The trigger would never fire.
    #[error("Trigger {key} has no fire times")]
    NoFireTimes { key: String },

    /// Persistence failed underneath a scheduling operation.
    #[error("Store error: {0}")]
    Store(#[from] conduit_store::StoreError),
}

impl From<conduit_core::ConduitError> for SchedulerError {
    fn from(e: conduit_core::ConduitError) -> Self {
        SchedulerError::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
