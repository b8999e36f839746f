//! State directory layout and locking.
//!
//! ```text
//! <state_dir>/
//! ├─ LOCK              # advisory lock, single writer process
//! ├─ events.journal    # pending execution events
//! ├─ rules.json        # local rule table snapshot
//! └─ sync_state.json   # cursor, last server config, clean-sync flag
//! ```

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const EVENTS_FILE: &str = "events.journal";
const RULES_FILE: &str = "rules.json";
const STATE_FILE: &str = "sync_state.json";

/// An opened, exclusively locked state directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StateDir {
    path: PathBuf,
    _lock_file: File,
}

impl StateDir {
    /// Opens `path`, creating it if needed, and takes the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock and
    /// [`StorageError::NotADirectory`] if `path` is a regular file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StorageError::NotADirectory(path.to_path_buf()));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the event journal.
    #[must_use]
    pub fn events_path(&self) -> PathBuf {
        self.path.join(EVENTS_FILE)
    }

    /// Path of the rule table snapshot.
    #[must_use]
    pub fn rules_path(&self) -> PathBuf {
        self.path.join(RULES_FILE)
    }

    /// Path of the engine state snapshot.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.path.join(STATE_FILE)
    }
}
