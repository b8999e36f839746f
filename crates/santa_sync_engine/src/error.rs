//! Error types for the sync engine.

use santa_sync_protocol::ProtocolError;
use santa_sync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync session.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A request missed its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The server answered with an error status.
    #[error("server rejected request ({status}): {message}")]
    ServerRejection {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
        /// The client should stop syncing until an operator intervenes.
        permanent: bool,
    },

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local storage failed.
    #[error("local storage error: {0}")]
    Storage(#[from] StoreError),

    /// The session was cancelled at a phase boundary.
    #[error("sync cancelled")]
    Cancelled,

    /// Another session is already running.
    #[error("a sync session is already in progress")]
    SessionInProgress,

    /// Sync was halted after a permanent rejection.
    #[error("sync halted: {0}")]
    Halted(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a non-success HTTP status to an error.
    ///
    /// 401 and 403 mean this machine's credentials were refused; that is
    /// treated as permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::ServerRejection {
            status,
            message: message.into(),
            permanent: matches!(status, 401 | 403),
        }
    }

    /// Returns true if retrying soon may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerRejection { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if automatic syncing must stop.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SyncError::ServerRejection { permanent: true, .. })
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad url").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::from_status(503, "unavailable").is_retryable());
        assert!(!SyncError::from_status(400, "bad request").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn auth_failures_are_permanent() {
        assert!(SyncError::from_status(401, "").is_permanent());
        assert!(SyncError::from_status(403, "revoked").is_permanent());
        assert!(!SyncError::from_status(404, "").is_permanent());
        assert!(!SyncError::from_status(500, "").is_permanent());
        assert!(!SyncError::Timeout.is_permanent());
    }

    #[test]
    fn error_display() {
        let err = SyncError::from_status(403, "machine revoked");
        assert_eq!(err.to_string(), "server rejected request (403): machine revoked");
        assert_eq!(SyncError::Timeout.to_string(), "operation timed out");
    }
}
