//! File-transfer connections used by sync plugins.
//!
//! The scheduler never touches these directly; a plugin opens a connection,
//! compares the two sides, copies what differs, and closes it again.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::TransferError;

/// Name of the marker file that reserves a destination for one connection.
pub const LOCK_FILE_NAME: &str = ".conduit.lock";

/// Runtime state of a transfer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Another connection holds the destination.
    LockedOut,
    Closed,
}

/// Which end of the connection to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

/// A regular file as seen on one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Open/close a storage connection and move files across it.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn open(&mut self) -> Result<ConnectionState, TransferError>;
    async fn close(&mut self) -> Result<(), TransferError>;
    fn state(&self) -> ConnectionState;
    async fn list(&self, side: Side) -> Result<Vec<FileEntry>, TransferError>;
    /// Copy one file from source to destination; returns bytes written.
    async fn copy(&self, name: &str) -> Result<u64, TransferError>;
}

/// True when `source` must be copied over `destination`.
///
/// Missing, differently sized, or older destination files are stale.
pub fn needs_copy(source: &FileEntry, destination: Option<&FileEntry>) -> bool {
    let Some(dest) = destination else {
        return true;
    };
    if source.size != dest.size {
        return true;
    }
    match (source.modified, dest.modified) {
        (Some(src), Some(dst)) => src > dst,
        _ => false,
    }
}

/// Transfer between two directories on the local filesystem.
pub struct LocalFileTransfer {
    source: PathBuf,
    destination: PathBuf,
    state: ConnectionState,
}

impl LocalFileTransfer {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            state: ConnectionState::Closed,
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.destination.join(LOCK_FILE_NAME)
    }

    fn root(&self, side: Side) -> &Path {
        match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        }
    }

    fn ensure_open(&self) -> Result<(), TransferError> {
        match self.state {
            ConnectionState::Open => Ok(()),
            _ => Err(TransferError::NotOpen),
        }
    }
}

#[async_trait]
impl FileTransfer for LocalFileTransfer {
    async fn open(&mut self) -> Result<ConnectionState, TransferError> {
        tokio::fs::create_dir_all(&self.destination).await?;
        let lock = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
            .await;
        self.state = match lock {
            Ok(_) => ConnectionState::Open,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(destination = %self.destination.display(), "destination locked by another connection");
                ConnectionState::LockedOut
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.state)
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        if self.state == ConnectionState::Open {
            match tokio::fs::remove_file(self.lock_path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn list(&self, side: Side) -> Result<Vec<FileEntry>, TransferError> {
        self.ensure_open()?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(self.root(side)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE_NAME {
                continue;
            }
            entries.push(FileEntry {
                name,
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn copy(&self, name: &str) -> Result<u64, TransferError> {
        self.ensure_open()?;
        let bytes = tokio::fs::copy(self.source.join(name), self.destination.join(name)).await?;
        debug!(file = name, bytes, "file copied");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(size: u64, modified_secs: u64) -> FileEntry {
        FileEntry {
            name: "a.csv".into(),
            size,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(modified_secs)),
        }
    }

    #[test]
    fn compare_rules() {
        assert!(needs_copy(&entry(10, 5), None));
        assert!(needs_copy(&entry(10, 5), Some(&entry(11, 5))));
        assert!(needs_copy(&entry(10, 9), Some(&entry(10, 5))));
        assert!(!needs_copy(&entry(10, 5), Some(&entry(10, 9))));
    }

    #[tokio::test]
    async fn second_connection_is_locked_out() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        let mut first = LocalFileTransfer::new(src.path(), dst.path());
        let mut second = LocalFileTransfer::new(src.path(), dst.path());
        assert_eq!(first.open().await.unwrap(), ConnectionState::Open);
        assert_eq!(second.open().await.unwrap(), ConnectionState::LockedOut);

        first.close().await.unwrap();
        assert_eq!(second.open().await.unwrap(), ConnectionState::Open);
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_skips_lock_file_and_directories() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("b.txt"), "bb").unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(src.path().join("nested")).unwrap();

        let mut conn = LocalFileTransfer::new(src.path(), dst.path());
        conn.open().await.unwrap();
        let names: Vec<String> = conn
            .list(Side::Source)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert!(conn.list(Side::Destination).await.unwrap().is_empty());
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_refuses_work() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let conn = LocalFileTransfer::new(src.path(), dst.path());
        assert!(matches!(
            conn.list(Side::Source).await,
            Err(TransferError::NotOpen)
        ));
    }
}
