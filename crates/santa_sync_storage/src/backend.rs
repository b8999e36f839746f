//! Journal backend trait.

use crate::error::StorageResult;

/// An append-only byte log.
///
/// Backends are opaque: framing, checksums and record semantics belong to the
/// caller. The event queue replays the whole log on open and truncates it
/// once every record has been acknowledged.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at, which is the
///   length of the log before the call
/// - `read_all` returns every byte appended since the last `truncate` or
///   `replace`
/// - after `sync` returns, appended data survives process termination
/// - after `replace`, the journal holds either its old bytes or exactly the
///   new ones, even across a crash
pub trait JournalBackend: Send {
    /// Reads the complete journal contents.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it starts at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current journal length in bytes.
    fn len(&self) -> StorageResult<u64>;

    /// Returns true if the journal holds no bytes.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrinks the journal to `new_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidTruncate`] if `new_len` exceeds
    /// the current length.
    fn truncate(&mut self, new_len: u64) -> StorageResult<()>;

    /// Replaces the whole journal with `data` as one durable step.
    ///
    /// On error the previous contents are left in place.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
