//! `conduit-plugins`: the job plugin contract, the registry that resolves
//! plugin types, and the controller that executes and retries them.

pub mod controller;
pub mod error;
pub mod file_sync;
pub mod plugin;
pub mod registry;
pub mod transfer;

pub use controller::{JobExecutionController, RetryPolicy};
pub use error::{ExecutionError, PluginError, TransferError};
pub use file_sync::{FileSyncPlugin, FILE_SYNC_PLUGIN};
pub use plugin::{ExecutionRequest, JobPlugin};
pub use registry::PluginRegistry;
