//! Local rule state.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use santa_sync_protocol::{RuleKey, RulePolicy, RuleRecord, RuleType};
use santa_sync_storage::SnapshotFile;
use std::collections::BTreeMap;

/// What the table holds for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRule {
    /// Whitelist, blacklist or silent blacklist. Never `Remove`.
    pub policy: RulePolicy,
    /// Message shown when the rule blocks.
    pub custom_message: Option<String>,
}

/// Rule totals by type, reported to the server and in status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleCounts {
    /// Binary rules.
    pub binary: u64,
    /// Certificate rules.
    pub certificate: u64,
}

/// Effect of applying one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RulePageStats {
    /// Rules inserted or replaced.
    pub upserted: usize,
    /// Rules deleted.
    pub removed: usize,
}

/// An in-memory rule set keyed by `(hash, rule_type)`.
///
/// This is a plain value; [`RuleTable`] adds locking and persistence. The
/// sync engine also builds one from scratch while streaming a clean sync
/// and swaps it in once the stream is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: BTreeMap<RuleKey, StoredRule>,
}

impl RuleSet {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that every rule in `page` can be applied.
    pub fn validate_page(page: &[RuleRecord]) -> StoreResult<()> {
        for rule in page {
            rule.validate()
                .map_err(|e| StoreError::InvalidRule(e.to_string()))?;
        }
        Ok(())
    }

    /// Applies `page` in order. Later records for the same key win.
    pub fn apply(&mut self, page: &[RuleRecord]) -> RulePageStats {
        let mut stats = RulePageStats::default();
        for rule in page {
            match rule.policy {
                RulePolicy::Whitelist | RulePolicy::Blacklist | RulePolicy::SilentBlacklist => {
                    self.rules.insert(
                        rule.key(),
                        StoredRule {
                            policy: rule.policy,
                            custom_message: rule.custom_message.clone(),
                        },
                    );
                    stats.upserted += 1;
                }
                RulePolicy::Remove => {
                    if self.rules.remove(&rule.key()).is_some() {
                        stats.removed += 1;
                    }
                }
            }
        }
        stats
    }

    /// Looks up a rule.
    pub fn get(&self, key: &RuleKey) -> Option<&StoredRule> {
        self.rules.get(key)
    }

    /// Returns true if a rule exists for `key`.
    pub fn contains(&self, key: &RuleKey) -> bool {
        self.rules.contains_key(key)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Counts rules by type.
    pub fn counts(&self) -> RuleCounts {
        let mut counts = RuleCounts::default();
        for key in self.rules.keys() {
            match key.rule_type {
                RuleType::Binary => counts.binary += 1,
                RuleType::Certificate => counts.certificate += 1,
            }
        }
        counts
    }

    /// Iterates rules in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RuleKey, &StoredRule)> {
        self.rules.iter()
    }

    fn to_records(&self) -> Vec<RuleRecord> {
        self.rules
            .iter()
            .map(|(key, rule)| RuleRecord {
                hash: key.hash.clone(),
                rule_type: key.rule_type,
                policy: rule.policy,
                custom_message: rule.custom_message.clone(),
            })
            .collect()
    }

    fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_records())?)
    }

    fn decode(bytes: &[u8]) -> StoreResult<Self> {
        let records: Vec<RuleRecord> = serde_json::from_slice(bytes)?;
        let mut set = Self::new();
        set.apply(&records);
        Ok(set)
    }
}

impl FromIterator<RuleRecord> for RuleSet {
    fn from_iter<I: IntoIterator<Item = RuleRecord>>(iter: I) -> Self {
        let records: Vec<RuleRecord> = iter.into_iter().collect();
        let mut set = Self::new();
        set.apply(&records);
        set
    }
}

/// Access to the persisted rule state.
///
/// The sync engine only talks to rules through this trait, so tests can
/// substitute a table that fails on demand.
pub trait RuleStore: Send + Sync {
    /// Applies a whole page. Either every record takes effect (in memory and
    /// on disk) or none does.
    fn apply_page(&self, page: &[RuleRecord]) -> StoreResult<RulePageStats>;

    /// Replaces the entire rule set at once.
    fn replace(&self, rules: RuleSet) -> StoreResult<()>;

    /// Looks up one rule.
    fn lookup(&self, key: &RuleKey) -> Option<StoredRule>;

    /// Rule totals by type.
    fn counts(&self) -> RuleCounts;

    /// Copy of the current rule set.
    fn snapshot(&self) -> RuleSet;
}

/// The local rule table, optionally persisted to a snapshot file.
///
/// Updates are copy-on-write: a page is applied to a copy, the copy is
/// written out, and only then does it replace the live set. A failed write
/// leaves both the file and the in-memory set as they were.
#[derive(Debug)]
pub struct RuleTable {
    rules: RwLock<RuleSet>,
    file: Option<SnapshotFile>,
}

impl RuleTable {
    /// Creates an empty table that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            rules: RwLock::new(RuleSet::new()),
            file: None,
        }
    }

    /// Loads the table from `file`, starting empty if it does not exist.
    pub fn open(file: SnapshotFile) -> StoreResult<Self> {
        let rules = match file.read()? {
            Some(bytes) => RuleSet::decode(&bytes)?,
            None => RuleSet::new(),
        };
        tracing::debug!(path = %file.path().display(), rules = rules.len(), "rule table loaded");
        Ok(Self {
            rules: RwLock::new(rules),
            file: Some(file),
        })
    }

    fn persist(&self, rules: &RuleSet) -> StoreResult<()> {
        if let Some(file) = &self.file {
            file.write(&rules.encode()?)?;
        }
        Ok(())
    }
}

impl RuleStore for RuleTable {
    fn apply_page(&self, page: &[RuleRecord]) -> StoreResult<RulePageStats> {
        RuleSet::validate_page(page)?;

        let mut live = self.rules.write();
        let mut next = live.clone();
        let stats = next.apply(page);
        self.persist(&next)?;
        *live = next;

        tracing::debug!(upserted = stats.upserted, removed = stats.removed, total = live.len(), "rule page applied");
        Ok(stats)
    }

    fn replace(&self, rules: RuleSet) -> StoreResult<()> {
        let mut live = self.rules.write();
        self.persist(&rules)?;
        tracing::info!(previous = live.len(), current = rules.len(), "rule table replaced");
        *live = rules;
        Ok(())
    }

    fn lookup(&self, key: &RuleKey) -> Option<StoredRule> {
        self.rules.read().get(key).cloned()
    }

    fn counts(&self) -> RuleCounts {
        self.rules.read().counts()
    }

    fn snapshot(&self) -> RuleSet {
        self.rules.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(hash: &str) -> RuleRecord {
        RuleRecord::new(hash, RuleType::Binary, RulePolicy::Whitelist)
    }

    #[test]
    fn remove_deletes_only_matching_type() {
        let mut set = RuleSet::new();
        set.apply(&[
            allow("h1"),
            RuleRecord::new("h1", RuleType::Certificate, RulePolicy::Blacklist),
        ]);
        let stats = set.apply(&[RuleRecord::new("h1", RuleType::Binary, RulePolicy::Remove)]);

        assert_eq!(stats, RulePageStats { upserted: 0, removed: 1 });
        assert!(!set.contains(&RuleKey::new("h1", RuleType::Binary)));
        assert!(set.contains(&RuleKey::new("h1", RuleType::Certificate)));
        assert_eq!(set.counts(), RuleCounts { binary: 0, certificate: 1 });
    }

    #[test]
    fn later_record_for_same_key_wins() {
        let mut set = RuleSet::new();
        set.apply(&[
            allow("h1"),
            RuleRecord::new("h1", RuleType::Binary, RulePolicy::SilentBlacklist).with_message("nope"),
        ]);
        let rule = set.get(&RuleKey::new("h1", RuleType::Binary)).unwrap();
        assert_eq!(rule.policy, RulePolicy::SilentBlacklist);
        assert_eq!(rule.custom_message.as_deref(), Some("nope"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn invalid_page_changes_nothing() {
        let table = RuleTable::in_memory();
        table.apply_page(&[allow("h0")]).unwrap();

        let bad = [allow("h1"), RuleRecord::new("", RuleType::Binary, RulePolicy::Whitelist)];
        assert!(matches!(table.apply_page(&bad), Err(StoreError::InvalidRule(_))));
        assert!(table.lookup(&RuleKey::new("h1", RuleType::Binary)).is_none());
        assert_eq!(table.counts().binary, 1);
    }

    #[test]
    fn replaying_a_page_is_idempotent() {
        let page = [
            allow("h1"),
            RuleRecord::new("h0", RuleType::Binary, RulePolicy::Remove),
        ];
        let table = RuleTable::in_memory();
        table.apply_page(&[allow("h0")]).unwrap();
        table.apply_page(&page).unwrap();
        let once = table.snapshot();
        table.apply_page(&page).unwrap();
        assert_eq!(table.snapshot(), once);
    }

    #[test]
    fn table_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("rules.json"));
        {
            let table = RuleTable::open(file.clone()).unwrap();
            table
                .apply_page(&[
                    allow("h1"),
                    RuleRecord::new("c1", RuleType::Certificate, RulePolicy::Blacklist)
                        .with_message("blocked by policy"),
                ])
                .unwrap();
        }
        let table = RuleTable::open(file.clone()).unwrap();
        assert_eq!(table.counts(), RuleCounts { binary: 1, certificate: 1 });
        let cert = table.lookup(&RuleKey::new("c1", RuleType::Certificate)).unwrap();
        assert_eq!(cert.custom_message.as_deref(), Some("blocked by policy"));

        table.replace([allow("h2")].into_iter().collect()).unwrap();
        let table = RuleTable::open(file).unwrap();
        assert_eq!(table.counts(), RuleCounts { binary: 1, certificate: 0 });
        assert!(table.lookup(&RuleKey::new("h2", RuleType::Binary)).is_some());
    }
}
