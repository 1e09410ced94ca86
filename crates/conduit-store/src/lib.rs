//! `conduit-store`: SQLite persistence for job configurations, the remote
//! execution mirror, and the event log.
//!
//! All repositories share one [`Database`] handle; each call is its own short
//! unit of work.

pub mod db;
pub mod error;
pub mod events;
pub mod jobs;
pub mod remote;

pub use db::Database;
pub use error::{Result, StoreError};
pub use events::{EventLog, SqliteEventLog};
pub use jobs::{JobRepository, SqliteJobStore};
pub use remote::{RemoteExecutionRepository, SqliteRemoteStore};
