//! The on-host state directory, opened as a whole.

use crate::error::StoreResult;
use crate::event_store::EventStore;
use crate::rules::RuleTable;
use crate::state::FileStateStore;
use santa_sync_storage::{SnapshotFile, StateDir};
use std::path::Path;
use std::sync::Arc;

/// Event queue, rule table and engine state backed by one locked directory.
///
/// The components are handed out as `Arc`s so the monitor side and the
/// sync engine can share them. The directory lock is held until the
/// `LocalStore` is dropped.
#[derive(Debug)]
pub struct LocalStore {
    dir: StateDir,
    events: Arc<EventStore>,
    rules: Arc<RuleTable>,
    state: Arc<FileStateStore>,
}

impl LocalStore {
    /// Opens (creating if needed) the state directory at `path`.
    ///
    /// Fails with a storage error if another process already holds it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let dir = StateDir::open(path)?;
        let events = Arc::new(EventStore::open_file(&dir.events_path())?);
        let rules = Arc::new(RuleTable::open(SnapshotFile::new(dir.rules_path()))?);
        let state = Arc::new(FileStateStore::new(SnapshotFile::new(dir.state_path())));

        tracing::info!(
            path = %dir.path().display(),
            pending_events = events.pending_count(),
            "local store opened"
        );

        Ok(Self {
            dir,
            events,
            rules,
            state,
        })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The event queue.
    pub fn events(&self) -> Arc<EventStore> {
        Arc::clone(&self.events)
    }

    /// The rule table.
    pub fn rules(&self) -> Arc<RuleTable> {
        Arc::clone(&self.rules)
    }

    /// The engine state store.
    pub fn state(&self) -> Arc<FileStateStore> {
        Arc::clone(&self.state)
    }
}
