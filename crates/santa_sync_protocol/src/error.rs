//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was not valid JSON or did not match the message shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An enumerated field carried a value this client does not understand.
    #[error("unknown {field} value: {value:?}")]
    UnknownValue {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The message was well-formed but semantically invalid.
    #[error("invalid message: {0}")]
    Invalid(String),
}

impl ProtocolError {
    /// Creates an unknown-value error.
    pub fn unknown(field: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownValue {
            field,
            value: value.into(),
        }
    }
}
