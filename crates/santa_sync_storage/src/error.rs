//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by journal backends and snapshot files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Truncation was asked to grow the journal.
    #[error("cannot truncate journal to {requested} bytes, current length is {current}")]
    InvalidTruncate {
        /// Requested length.
        requested: u64,
        /// Current length.
        current: u64,
    },

    /// Another process holds the state directory lock.
    #[error("state directory {0} is locked by another process")]
    Locked(PathBuf),

    /// The path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}
