use thiserror::Error;

/// Failures of a reconciliation pass or of the remote system itself.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] conduit_store::StoreError),
}

pub type Result<T> = std::result::Result<T, RemoteError>;
