use thiserror::Error;

/// Failure to turn a configured plugin type into a runnable plugin.
///
/// Always a configuration problem: never retried.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Unknown plugin type: {plugin_type}")]
    UnknownType { plugin_type: String },

    #[error("Plugin '{plugin_type}' could not be created: {reason}")]
    Instantiation { plugin_type: String, reason: String },
}

/// Error raised by a plugin while executing. Converted into an EXCEPTION
/// result by the execution controller and eligible for retry.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("{0}")]
    Failed(String),
}

/// Errors from a [`FileTransfer`](crate::transfer::FileTransfer) connection.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection is not open")]
    NotOpen,
}
