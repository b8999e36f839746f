//! Rule phase: cursor-driven rule download.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use santa_sync_protocol::{RuleDownloadRequest, SyncCursor};
use santa_sync_store::{RulePageStats, RuleSet, RuleStore, StateStore, SyncEngineState};

/// Summary of a completed rule phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSyncResult {
    /// Pages fetched.
    pub pages: usize,
    /// Records upserted across all pages.
    pub upserted: usize,
    /// Records removed across all pages.
    pub removed: usize,
    /// The local rule set was rebuilt from scratch.
    pub clean: bool,
    /// Cursor saved at the end of the phase.
    pub cursor: SyncCursor,
}

impl RuleSyncResult {
    fn add(&mut self, stats: RulePageStats) {
        self.pages += 1;
        self.upserted += stats.upserted;
        self.removed += stats.removed;
    }
}

/// Downloads rule pages and applies them to the local rule store.
///
/// # Incremental sync
///
/// Each page is applied atomically and then the server's next cursor is
/// saved. If the process dies between the two, the page is fetched again
/// from the old cursor; applying a page twice gives the same rule set as
/// applying it once.
///
/// # Clean sync
///
/// Pages are collected into a fresh [`RuleSet`] that replaces the local
/// rules only once the server signals the last page. A failure part way
/// leaves the old rules in place and the clean sync still owed.
///
/// At the end of the stream the cursor that fetched the last page is kept,
/// so the next session resumes there.
pub struct RuleApplier<'a, T: SyncTransport + ?Sized> {
    transport: &'a T,
    rules: &'a dyn RuleStore,
    state_store: &'a dyn StateStore,
}

impl<'a, T: SyncTransport + ?Sized> RuleApplier<'a, T> {
    /// Creates an applier.
    pub fn new(transport: &'a T, rules: &'a dyn RuleStore, state_store: &'a dyn StateStore) -> Self {
        Self {
            transport,
            rules,
            state_store,
        }
    }

    /// Runs the rule phase starting at `state.cursor`.
    ///
    /// `state` is updated and saved at every commit point. On error it
    /// holds the last committed cursor.
    pub fn apply_rules(&self, state: &mut SyncEngineState, clean: bool) -> SyncResult<RuleSyncResult> {
        if clean {
            self.clean_sync(state)
        } else {
            self.incremental_sync(state)
        }
    }

    fn incremental_sync(&self, state: &mut SyncEngineState) -> SyncResult<RuleSyncResult> {
        let mut result = RuleSyncResult::default();
        loop {
            let request = RuleDownloadRequest::new(state.cursor.clone());
            let page = self.transport.download_rules(&request)?;
            let stats = self.rules.apply_page(&page.rules)?;
            result.add(stats);
            tracing::debug!(
                page = result.pages,
                cursor = %state.cursor,
                rules = page.rules.len(),
                "rule page applied"
            );

            match page.next_cursor() {
                Some(next) => {
                    check_progress(&state.cursor, next)?;
                    state.cursor = next.clone();
                    self.state_store.save(state)?;
                }
                None => break,
            }
        }

        result.cursor = state.cursor.clone();
        Ok(result)
    }

    fn clean_sync(&self, state: &mut SyncEngineState) -> SyncResult<RuleSyncResult> {
        let mut result = RuleSyncResult {
            clean: true,
            ..RuleSyncResult::default()
        };
        let mut staged = RuleSet::new();
        let mut cursor = SyncCursor::start();

        loop {
            let request = RuleDownloadRequest::new(cursor.clone());
            let page = self.transport.download_rules(&request)?;
            RuleSet::validate_page(&page.rules)?;
            result.add(staged.apply(&page.rules));
            tracing::debug!(page = result.pages, staged = staged.len(), "clean sync page staged");

            match page.next_cursor() {
                Some(next) => {
                    check_progress(&cursor, next)?;
                    cursor = next.clone();
                }
                None => break,
            }
        }

        let staged_len = staged.len();
        self.rules.replace(staged)?;
        state.cursor = cursor;
        state.clean_sync_requested = false;
        state.clean_sync_owed = false;
        self.state_store.save(state)?;
        tracing::info!(rules = staged_len, pages = result.pages, "clean sync committed");

        result.cursor = state.cursor.clone();
        Ok(result)
    }
}

/// A server handing back the cursor it was just given would loop forever.
fn check_progress(current: &SyncCursor, next: &SyncCursor) -> SyncResult<()> {
    if current == next {
        return Err(SyncError::Protocol(format!(
            "server returned the same cursor {current} twice"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use santa_sync_protocol::{RuleDownloadResponse, RuleKey, RulePolicy, RuleRecord, RuleType};
    use santa_sync_store::{MemoryStateStore, RuleTable};

    fn allow(hash: &str) -> RuleRecord {
        RuleRecord::new(hash, RuleType::Binary, RulePolicy::Whitelist)
    }

    fn key(hash: &str) -> RuleKey {
        RuleKey::new(hash, RuleType::Binary)
    }

    #[test]
    fn incremental_sync_follows_cursors() {
        let transport = MockTransport::new();
        transport.push_rule_page(Ok(RuleDownloadResponse::page(vec![allow("h1")], "c1")));
        transport.push_rule_page(Ok(RuleDownloadResponse::last(vec![allow("h2")])));
        let rules = RuleTable::in_memory();
        let states = MemoryStateStore::new();
        let mut state = SyncEngineState::default();

        let result = RuleApplier::new(&transport, &rules, &states)
            .apply_rules(&mut state, false)
            .unwrap();

        assert_eq!(result.pages, 2);
        assert_eq!(result.upserted, 2);
        assert_eq!(result.cursor, SyncCursor::new("c1"));
        assert_eq!(states.load().unwrap().cursor, SyncCursor::new("c1"));
        assert_eq!(rules.counts().binary, 2);
    }

    #[test]
    fn failed_page_keeps_committed_cursor() {
        let transport = MockTransport::new();
        transport.push_rule_page(Ok(RuleDownloadResponse::page(vec![allow("h1")], "c1")));
        transport.push_rule_page(Err(SyncError::transport_retryable("reset")));
        let rules = RuleTable::in_memory();
        let states = MemoryStateStore::new();
        let mut state = SyncEngineState::default();

        let err = RuleApplier::new(&transport, &rules, &states)
            .apply_rules(&mut state, false)
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(state.cursor, SyncCursor::new("c1"));
        assert_eq!(states.load().unwrap().cursor, SyncCursor::new("c1"));
        assert!(rules.lookup(&key("h1")).is_some());
    }

    #[test]
    fn clean_sync_failure_keeps_old_rules() {
        let transport = MockTransport::new();
        transport.push_rule_page(Ok(RuleDownloadResponse::page(vec![allow("h1")], "c1")));
        transport.push_rule_page(Err(SyncError::Timeout));
        let rules = RuleTable::in_memory();
        rules.apply_page(&[allow("h0")]).unwrap();
        let states = MemoryStateStore::new();
        let mut state = SyncEngineState {
            clean_sync_requested: true,
            ..SyncEngineState::default()
        };

        assert!(RuleApplier::new(&transport, &rules, &states)
            .apply_rules(&mut state, true)
            .is_err());
        assert!(rules.lookup(&key("h0")).is_some());
        assert!(rules.lookup(&key("h1")).is_none());
        assert!(state.clean_sync_requested);
        assert!(state.cursor.is_start());
    }

    #[test]
    fn clean_sync_replaces_everything() {
        let transport = MockTransport::new();
        transport.push_rule_page(Ok(RuleDownloadResponse::page(vec![allow("h1")], "c1")));
        transport.push_rule_page(Ok(RuleDownloadResponse::last(vec![allow("h2")])));
        let rules = RuleTable::in_memory();
        rules.apply_page(&[allow("h0")]).unwrap();
        let states = MemoryStateStore::new();
        let mut state = SyncEngineState {
            cursor: SyncCursor::new("stale"),
            clean_sync_requested: true,
            clean_sync_owed: true,
            ..SyncEngineState::default()
        };

        let result = RuleApplier::new(&transport, &rules, &states)
            .apply_rules(&mut state, true)
            .unwrap();

        assert!(result.clean);
        assert!(transport.rule_requests()[0].cursor.is_start());
        assert!(rules.lookup(&key("h0")).is_none());
        assert_eq!(rules.counts().binary, 2);
        let saved = states.load().unwrap();
        assert!(!saved.clean_sync_due());
        assert_eq!(saved.cursor, SyncCursor::new("c1"));
    }

    #[test]
    fn repeated_cursor_is_rejected() {
        let transport = MockTransport::new();
        transport.push_rule_page(Ok(RuleDownloadResponse::page(vec![], "c1")));
        transport.push_rule_page(Ok(RuleDownloadResponse::page(vec![], "c1")));
        let rules = RuleTable::in_memory();
        let states = MemoryStateStore::new();
        let mut state = SyncEngineState::default();

        let err = RuleApplier::new(&transport, &rules, &states)
            .apply_rules(&mut state, false)
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert_eq!(state.cursor, SyncCursor::new("c1"));
    }
}
