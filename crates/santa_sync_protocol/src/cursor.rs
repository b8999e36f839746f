//! Rule pagination cursor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque server-issued token marking rule download progress.
///
/// The empty cursor means "from the beginning".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// The start-of-stream cursor.
    pub fn start() -> Self {
        Self::default()
    }

    /// Wraps a server token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns true if this cursor points at the start of the rule stream.
    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Forgets all progress.
    pub fn reset(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_start() {
            f.write_str("<start>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for SyncCursor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SyncCursor {
    fn from(value: String) -> Self {
        Self(value)
    }
}
