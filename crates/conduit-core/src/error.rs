use thiserror::Error;

use crate::types::RepeatUnit;

#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid repeat configuration: unit {unit} requires a positive value (got {value:?})")]
    InvalidRepeat {
        unit: RepeatUnit,
        value: Option<u32>,
    },

    #[error("Invalid time zone: {0}")]
    InvalidTimeZone(String),
}

impl ConduitError {
    /// Short error code string used in admin API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ConduitError::Config(_) => "CONFIG_ERROR",
            ConduitError::InvalidRepeat { .. } => "INVALID_REPEAT",
            ConduitError::InvalidTimeZone(_) => "INVALID_TIME_ZONE",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConduitError>;
