//! Error types for the local store.

use santa_sync_protocol::ProtocolError;
use santa_sync_storage::StorageError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the event queue, rule table and state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A snapshot file held invalid JSON.
    #[error("snapshot decode error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// The event journal failed verification.
    #[error("event journal corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Byte offset of the bad frame.
        offset: u64,
        /// What was wrong.
        reason: String,
    },

    /// A rule page could not be applied.
    #[error("rule page rejected: {0}")]
    InvalidRule(String),
}

impl StoreError {
    pub(crate) fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }
}
