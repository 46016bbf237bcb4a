/// Error types for the backup engine
///
/// Only fatal failures are errors. Per-asset fetch/upload failures and
/// per-shop insert failures are collected as strings in the outcome of the
/// run and never surface as one of these.

use std::io;
use thiserror::Error;

/// Failure of a collaborator (record store or object store)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Fatal failure of a backup or restore invocation
#[derive(Debug, Error)]
pub enum BackupError {
    /// Manifest missing or structurally invalid
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// The output sink stopped accepting bytes (e.g. client went away)
    #[error("failed to write backup output: {0}")]
    Sink(#[source] io::Error),

    #[error("record store unavailable: {0}")]
    RecordStore(#[source] StoreError),

    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BackupError {
    pub fn is_corrupt_archive(&self) -> bool {
        matches!(self, BackupError::CorruptArchive(_))
    }
}

pub type BackupResult<T> = std::result::Result<T, BackupError>;
