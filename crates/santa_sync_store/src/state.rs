//! Persisted sync engine state.

use crate::error::StoreResult;
use parking_lot::Mutex;
use santa_sync_protocol::{SyncConfig, SyncCursor};
use santa_sync_storage::SnapshotFile;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a sync session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    /// Every phase succeeded.
    Success,
    /// The session finished, but some events or logs still need sending.
    Partial,
    /// The session was aborted.
    Failure,
}

impl SessionOutcome {
    /// Lowercase name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Success => "success",
            SessionOutcome::Partial => "partial",
            SessionOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the orchestrator carries from one session to the next.
///
/// The orchestrator loads this at session start and saves it at each
/// commit point. Nothing else mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncEngineState {
    /// Rule download progress.
    #[serde(default)]
    pub cursor: SyncCursor,
    /// Last config the server sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SyncConfig>,
    /// An operator asked for a clean sync that has not completed yet. Sent
    /// to the server as `request_clean_sync`.
    #[serde(default)]
    pub clean_sync_requested: bool,
    /// The server asked for a clean sync that has not completed yet.
    #[serde(default)]
    pub clean_sync_owed: bool,
    /// End of the last fully successful session, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_sync: Option<u64>,
    /// Set when the server permanently rejected this client. Sync stays off
    /// until an operator clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
    /// End of the last session, whatever its outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_at: Option<u64>,
    /// How the last session ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<SessionOutcome>,
    /// Error that aborted the last session, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncEngineState {
    /// Returns true if automatic syncing is suspended.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Returns true if the next rule phase must rebuild from scratch.
    pub fn clean_sync_due(&self) -> bool {
        self.clean_sync_requested || self.clean_sync_owed
    }
}

/// Load/save boundary for [`SyncEngineState`].
pub trait StateStore: Send + Sync {
    /// Loads the last saved state, or the default if none was saved.
    fn load(&self) -> StoreResult<SyncEngineState>;

    /// Replaces the saved state.
    fn save(&self, state: &SyncEngineState) -> StoreResult<()>;
}

/// State kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<SyncEngineState>,
}

impl MemoryStateStore {
    /// Creates a store holding the default state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store preloaded with `state`.
    #[must_use]
    pub fn with_state(state: SyncEngineState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StoreResult<SyncEngineState> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &SyncEngineState) -> StoreResult<()> {
        *self.state.lock() = state.clone();
        Ok(())
    }
}

/// State persisted as a JSON snapshot file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    file: SnapshotFile,
}

impl FileStateStore {
    /// Uses `file` for the state.
    #[must_use]
    pub fn new(file: SnapshotFile) -> Self {
        Self { file }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> StoreResult<SyncEngineState> {
        match self.file.read()? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(SyncEngineState::default()),
        }
    }

    fn save(&self, state: &SyncEngineState) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.file.write(&bytes)?;
        tracing::trace!(cursor = %state.cursor, "sync state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use santa_sync_protocol::ClientMode;

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(SnapshotFile::new(dir.path().join("state.json")));
        assert_eq!(store.load().unwrap(), SyncEngineState::default());
    }

    #[test]
    fn state_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(SnapshotFile::new(dir.path().join("state.json")));
        let state = SyncEngineState {
            cursor: SyncCursor::new("c7"),
            config: Some(SyncConfig {
                client_mode: ClientMode::Lockdown,
                batch_size: Some(10),
                ..SyncConfig::default()
            }),
            clean_sync_requested: true,
            clean_sync_owed: false,
            last_successful_sync: Some(1_700_000_000),
            halted: None,
            last_session_at: Some(1_700_000_600),
            last_outcome: Some(SessionOutcome::Failure),
            last_error: Some("request timed out".into()),
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn older_state_files_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("state.json"));
        file.write(br#"{"cursor":"c3"}"#).unwrap();
        let state = FileStateStore::new(file).load().unwrap();
        assert_eq!(state.cursor, SyncCursor::new("c3"));
        assert!(!state.clean_sync_requested);
        assert!(!state.clean_sync_due());
        assert!(!state.is_halted());
        assert!(state.last_outcome.is_none());
    }

    #[test]
    fn outcome_is_stored_lowercase() {
        let state = SyncEngineState {
            last_outcome: Some(SessionOutcome::Partial),
            ..SyncEngineState::default()
        };
        let json: serde_json::Value = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_outcome"], "partial");
    }
}
