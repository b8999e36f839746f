//! Error types for the sync server.

use santa_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request body could not be decoded.
    #[error("malformed body: {0}")]
    Protocol(#[from] ProtocolError),

    /// The machine is not allowed to sync.
    #[error("machine {0} is revoked")]
    Revoked(String),

    /// No such endpoint.
    #[error("no such endpoint: {0}")]
    NotFound(String),

    /// A failure queued by a test.
    #[error("injected failure ({0})")]
    Injected(u16),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Protocol(_) => 400,
            ServerError::Revoked(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::Injected(status) => *status,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert_eq!(ServerError::Revoked("C02".into()).status(), 403);
        assert!(ServerError::Injected(503).is_server_error());
        assert!(!ServerError::Injected(429).is_server_error());
    }
}
