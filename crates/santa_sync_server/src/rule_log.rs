//! Server-side rule log.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use santa_sync_protocol::{
    RuleDownloadResponse, RuleKey, RulePolicy, RuleRecord, RuleType, SyncCursor,
};
use std::collections::BTreeMap;

/// Every rule change ever published, in publish order.
///
/// A cursor is the decimal position of the first entry of the page it asks
/// for; the empty cursor means position 0. Clients replaying the log from any
/// cursor they were given end with the same rule set, because later entries
/// for a key overwrite earlier ones.
pub struct RuleLog {
    entries: RwLock<Vec<RuleRecord>>,
}

impl RuleLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Appends rule changes. Returns the new log length.
    pub fn publish(&self, rules: impl IntoIterator<Item = RuleRecord>) -> usize {
        let mut entries = self.entries.write();
        entries.extend(rules);
        entries.len()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing was published.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the page starting at `cursor`.
    pub fn page(&self, cursor: &SyncCursor, limit: usize) -> ServerResult<RuleDownloadResponse> {
        let entries = self.entries.read();
        let start = if cursor.is_start() {
            0
        } else {
            cursor
                .as_str()
                .parse::<usize>()
                .map_err(|_| ServerError::InvalidRequest(format!("bad cursor {cursor}")))?
        };
        if start > entries.len() {
            return Err(ServerError::InvalidRequest(format!(
                "cursor {cursor} is past the end of the rule log"
            )));
        }

        let end = entries.len().min(start + limit.max(1));
        let rules = entries[start..end].to_vec();
        if end < entries.len() {
            Ok(RuleDownloadResponse::page(rules, SyncCursor::new(end.to_string())))
        } else {
            Ok(RuleDownloadResponse::last(rules))
        }
    }

    /// The rule set a client holds after applying the whole log.
    pub fn current(&self) -> BTreeMap<RuleKey, RuleRecord> {
        let mut current = BTreeMap::new();
        for rule in self.entries.read().iter() {
            if rule.policy == RulePolicy::Remove {
                current.remove(&rule.key());
            } else {
                current.insert(rule.key(), rule.clone());
            }
        }
        current
    }

    /// Binary and certificate rule totals of [`current`](Self::current).
    pub fn counts(&self) -> (u64, u64) {
        self.current()
            .keys()
            .fold((0, 0), |(binary, cert), key| match key.rule_type {
                RuleType::Binary => (binary + 1, cert),
                RuleType::Certificate => (binary, cert + 1),
            })
    }
}

impl Default for RuleLog {
    fn default() -> Self {
        Self::new()
    }
}
