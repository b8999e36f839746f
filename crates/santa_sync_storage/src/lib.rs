//! # santa-sync storage
//!
//! Lowest-level persistence for the sync client. Nothing in this crate knows
//! what an execution event or a rule is:
//!
//! - [`JournalBackend`] is an append-only byte log. [`MemoryJournal`] backs
//!   tests, [`FileJournal`] backs the on-host event queue.
//! - [`SnapshotFile`] replaces a whole file atomically (write, fsync, rename)
//!   and is used for the rule table and the engine state.
//! - [`StateDir`] owns the on-disk layout and holds an exclusive advisory
//!   lock so only one process writes the sync state at a time.
//!
//! ## Example
//!
//! ```rust
//! use santa_sync_storage::{JournalBackend, MemoryJournal};
//!
//! let mut journal = MemoryJournal::new();
//! let offset = journal.append(b"record").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(journal.read_all().unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod dir;
mod error;
mod file;
mod memory;
mod snapshot;

pub use backend::JournalBackend;
pub use dir::StateDir;
pub use error::{StorageError, StorageResult};
pub use file::FileJournal;
pub use memory::MemoryJournal;
pub use snapshot::SnapshotFile;
