//! `conduit-remote`: keeps the local mirror of remote query executions in
//! step with the remote system that issues them.

pub mod batch;
pub mod client;
pub mod error;
pub mod reconciler;

pub use batch::StatusBatch;
pub use client::{HttpRemoteClient, RemoteClient, RemoteExecutionRecord};
pub use error::{RemoteError, Result};
pub use reconciler::{ReconcileReport, RemoteQueryReconciler};
