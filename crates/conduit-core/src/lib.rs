//! `conduit-core`: configuration, shared error type, and the domain records
//! every other crate passes around.

pub mod config;
pub mod error;
pub mod types;

pub use config::ConduitConfig;
pub use error::{ConduitError, Result};
pub use types::{
    Cadence, EventOutcome, EventResult, ExecutionKind, JobConfiguration, RemoteQueryExecution,
    RemoteStatus, RepeatUnit,
};
