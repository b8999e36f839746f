//! Persistent queue of recorded execution events.

mod journal;

use crate::error::{StoreError, StoreResult};
use journal::JournalRecord;
use parking_lot::Mutex;
use santa_sync_protocol::{BundleMetadata, EventRecord, PendingEventEnvelope};
use santa_sync_storage::{FileJournal, JournalBackend, MemoryJournal};
use std::collections::BTreeMap;
use std::path::Path;

struct Inner {
    journal: Box<dyn JournalBackend>,
    events: BTreeMap<u64, EventRecord>,
    next_index: u64,
}

impl Inner {
    /// Writes one frame and makes it durable.
    ///
    /// On failure the journal is cut back to its previous length so a
    /// half-written frame never sits in front of later appends.
    fn write(&mut self, record: &JournalRecord) -> StoreResult<()> {
        let frame = record.to_frame()?;
        let before = self.journal.len()?;
        let result = self
            .journal
            .append(&frame)
            .and_then(|_| self.journal.sync());
        if let Err(err) = result {
            if let Err(rollback) = self.journal.truncate(before) {
                tracing::warn!(error = %rollback, "failed to roll back partial journal frame");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Swaps the journal for a single checkpoint frame once the queue is
    /// empty. The swap is atomic, so the index counter is never lost.
    fn compact(&mut self) -> StoreResult<()> {
        let frame = JournalRecord::Checkpoint {
            next_index: self.next_index,
        }
        .to_frame()?;
        self.journal.replace(&frame)?;
        Ok(())
    }
}

/// The local queue of execution events awaiting upload.
///
/// Every mutation is appended to a checksummed journal before it becomes
/// visible, and the whole queue is rebuilt from that journal on open.
/// All methods take `&self`; the monitor can append from any thread while
/// the uploader reads and acknowledges.
///
/// # Ordering
///
/// Indices are assigned from a counter that only grows, so index order is
/// insertion order. [`pending_envelopes`](Self::pending_envelopes) returns
/// the oldest events first.
///
/// # Example
///
/// ```rust
/// use santa_sync_protocol::{Decision, EventRecord};
/// use santa_sync_store::EventStore;
///
/// let store = EventStore::in_memory();
/// let index = store
///     .append(EventRecord::new("abc", "/usr/bin/true", Decision::AllowBinary, 0.0))
///     .unwrap();
///
/// let batch = store.pending_envelopes(10).unwrap();
/// assert_eq!(batch[0].index(), index);
///
/// store.acknowledge(&[index]).unwrap();
/// assert_eq!(store.pending_count(), 0);
/// ```
pub struct EventStore {
    inner: Mutex<Inner>,
}

impl EventStore {
    /// Opens a store over `journal`, replaying everything it holds.
    ///
    /// A frame cut short at the end of the journal (a crash mid-append) is
    /// discarded. Any other damage is reported as
    /// [`StoreError::Corrupted`].
    pub fn open<J: JournalBackend + 'static>(journal: J) -> StoreResult<Self> {
        let mut journal: Box<dyn JournalBackend> = Box::new(journal);
        let data = journal.read_all()?;
        let replayed = journal::replay(&data)?;

        if replayed.valid_len < data.len() as u64 {
            tracing::warn!(
                valid_len = replayed.valid_len,
                total_len = data.len(),
                "discarding torn tail of event journal"
            );
            journal.truncate(replayed.valid_len)?;
        }

        let mut events = BTreeMap::new();
        let mut next_index = 1u64;
        for (offset, record) in replayed.records {
            match record {
                JournalRecord::Append { index, event_json } => {
                    let mut event = EventRecord::decode(&event_json).map_err(|e| {
                        StoreError::corrupted(offset, format!("undecodable event: {e}"))
                    })?;
                    event.index = index;
                    events.insert(index, event);
                    next_index = next_index.max(index + 1);
                }
                JournalRecord::BundleUpdate {
                    index,
                    metadata_json,
                } => {
                    let metadata: BundleMetadata =
                        serde_json::from_slice(&metadata_json).map_err(|e| {
                            StoreError::corrupted(offset, format!("undecodable bundle update: {e}"))
                        })?;
                    if let Some(event) = events.get_mut(&index) {
                        event.apply_bundle_metadata(metadata);
                    }
                }
                JournalRecord::Ack { indices } => {
                    for index in indices {
                        events.remove(&index);
                    }
                }
                JournalRecord::Checkpoint { next_index: n } => {
                    next_index = next_index.max(n);
                }
            }
        }

        tracing::debug!(pending = events.len(), next_index, "event store opened");

        Ok(Self {
            inner: Mutex::new(Inner {
                journal,
                events,
                next_index,
            }),
        })
    }

    /// Opens (or creates) a file-backed store at `path`.
    pub fn open_file(path: &Path) -> StoreResult<Self> {
        Self::open(FileJournal::open(path)?)
    }

    /// Creates an empty store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                journal: Box::new(MemoryJournal::new()),
                events: BTreeMap::new(),
                next_index: 1,
            }),
        }
    }

    /// Stores `event` and returns the index assigned to it.
    ///
    /// Any index already set on `event` is overwritten.
    pub fn append(&self, mut event: EventRecord) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let index = inner.next_index;
        event.index = index;
        let event_json = event.encode()?;

        inner.write(&JournalRecord::Append { index, event_json })?;
        inner.events.insert(index, event);
        inner.next_index = index + 1;

        tracing::trace!(index, "event appended");
        Ok(index)
    }

    /// Returns up to `limit` queued events, oldest first, serialized as they
    /// are right now.
    ///
    /// Events appended after this call returns are not in the result but
    /// stay queued for the next one.
    pub fn pending_envelopes(&self, limit: usize) -> StoreResult<Vec<PendingEventEnvelope>> {
        let inner = self.inner.lock();
        inner
            .events
            .values()
            .take(limit)
            .map(|event| PendingEventEnvelope::from_event(event).map_err(StoreError::from))
            .collect()
    }

    /// Removes exactly the queued events whose index is in `indices`.
    ///
    /// Unknown or already acknowledged indices are ignored. Returns how many
    /// events were removed. When the queue becomes empty the journal is
    /// compacted.
    pub fn acknowledge(&self, indices: &[u64]) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let mut present: Vec<u64> = indices
            .iter()
            .copied()
            .filter(|i| inner.events.contains_key(i))
            .collect();
        present.sort_unstable();
        present.dedup();
        if present.is_empty() {
            return Ok(0);
        }

        inner.write(&JournalRecord::Ack {
            indices: present.clone(),
        })?;
        for index in &present {
            inner.events.remove(index);
        }

        if inner.events.is_empty() {
            // The acknowledgment is already durable; a failed compaction only
            // leaves a longer journal behind.
            if let Err(err) = inner.compact() {
                tracing::warn!(error = %err, "event journal compaction failed");
            }
        }

        tracing::debug!(acknowledged = present.len(), remaining = inner.events.len(), "events acknowledged");
        Ok(present.len())
    }

    /// Attaches bundle metadata to a queued event and clears its
    /// `needs_bundle_hash` flag.
    ///
    /// Returns `false` if the event is no longer queued. Envelopes handed out
    /// earlier keep the bytes they were created with.
    pub fn update_bundle_metadata(&self, index: u64, metadata: BundleMetadata) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.events.contains_key(&index) {
            return Ok(false);
        }

        let metadata_json = serde_json::to_vec(&metadata)?;
        inner.write(&JournalRecord::BundleUpdate {
            index,
            metadata_json,
        })?;
        if let Some(event) = inner.events.get_mut(&index) {
            event.apply_bundle_metadata(metadata);
        }
        Ok(true)
    }

    /// Number of queued events.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Returns a copy of the queued event at `index`.
    pub fn get(&self, index: u64) -> Option<EventRecord> {
        self.inner.lock().events.get(&index).cloned()
    }

    /// The index the next append will receive.
    pub fn next_index(&self) -> u64 {
        self.inner.lock().next_index
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventStore")
            .field("pending", &inner.events.len())
            .field("next_index", &inner.next_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use santa_sync_protocol::Decision;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn event(hash: &str) -> EventRecord {
        EventRecord::new(hash, format!("/Applications/{hash}"), Decision::AllowUnknown, 1.5)
    }

    fn indices(envelopes: &[PendingEventEnvelope]) -> Vec<u64> {
        envelopes.iter().map(PendingEventEnvelope::index).collect()
    }

    #[test]
    fn append_assigns_increasing_indices() {
        let store = EventStore::in_memory();
        assert_eq!(store.append(event("a")).unwrap(), 1);
        assert_eq!(store.append(event("b")).unwrap(), 2);
        assert_eq!(store.append(event("c")).unwrap(), 3);
        assert_eq!(indices(&store.pending_envelopes(2).unwrap()), vec![1, 2]);
        assert_eq!(indices(&store.pending_envelopes(10).unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn acknowledge_removes_only_named_indices() {
        let store = EventStore::in_memory();
        for h in ["a", "b", "c"] {
            store.append(event(h)).unwrap();
        }
        assert_eq!(store.acknowledge(&[2, 99]).unwrap(), 1);
        assert_eq!(indices(&store.pending_envelopes(10).unwrap()), vec![1, 3]);
        assert_eq!(store.acknowledge(&[2]).unwrap(), 0);
    }

    #[test]
    fn queue_survives_reopen() {
        let journal = MemoryJournal::new();
        {
            let store = EventStore::open(journal.clone()).unwrap();
            store.append(event("a")).unwrap();
            store.append(event("b")).unwrap();
            store.acknowledge(&[1]).unwrap();
            store
                .update_bundle_metadata(
                    2,
                    BundleMetadata {
                        hash: Some("bundle".into()),
                        ..BundleMetadata::default()
                    },
                )
                .unwrap();
        }

        let store = EventStore::open(journal).unwrap();
        assert_eq!(store.pending_count(), 1);
        let reopened = store.get(2).unwrap();
        assert_eq!(reopened.file_sha256, "b");
        assert_eq!(reopened.bundle.hash.as_deref(), Some("bundle"));
        assert_eq!(store.append(event("c")).unwrap(), 3);
    }

    #[test]
    fn compaction_keeps_index_counter() {
        let journal = MemoryJournal::new();
        let store = EventStore::open(journal.clone()).unwrap();
        store.append(event("a")).unwrap();
        store.append(event("b")).unwrap();
        let full_len = journal.bytes().len();
        store.acknowledge(&[1, 2]).unwrap();
        assert!(journal.bytes().len() < full_len);
        drop(store);

        let store = EventStore::open(journal).unwrap();
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.append(event("c")).unwrap(), 3);
    }

    /// Shares a memory journal but refuses to replace it.
    struct NoReplaceJournal(MemoryJournal);

    impl JournalBackend for NoReplaceJournal {
        fn read_all(&self) -> santa_sync_storage::StorageResult<Vec<u8>> {
            self.0.read_all()
        }
        fn append(&mut self, data: &[u8]) -> santa_sync_storage::StorageResult<u64> {
            self.0.append(data)
        }
        fn sync(&mut self) -> santa_sync_storage::StorageResult<()> {
            self.0.sync()
        }
        fn len(&self) -> santa_sync_storage::StorageResult<u64> {
            self.0.len()
        }
        fn truncate(&mut self, new_len: u64) -> santa_sync_storage::StorageResult<()> {
            self.0.truncate(new_len)
        }
        fn replace(&mut self, _data: &[u8]) -> santa_sync_storage::StorageResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
    }

    #[test]
    fn failed_compaction_never_reuses_indices() {
        let journal = MemoryJournal::new();
        let store = EventStore::open(NoReplaceJournal(journal.clone())).unwrap();
        store.append(event("a")).unwrap();
        store.append(event("b")).unwrap();
        assert_eq!(store.acknowledge(&[1, 2]).unwrap(), 2);
        drop(store);

        let store = EventStore::open(journal).unwrap();
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.append(event("c")).unwrap(), 3);
    }

    #[test]
    fn compacted_file_journal_keeps_index_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");
        {
            let store = EventStore::open_file(&path).unwrap();
            store.append(event("a")).unwrap();
            store.append(event("b")).unwrap();
            store.acknowledge(&[1, 2]).unwrap();
            assert_eq!(store.append(event("c")).unwrap(), 3);
        }

        let store = EventStore::open_file(&path).unwrap();
        assert_eq!(indices(&store.pending_envelopes(10).unwrap()), vec![3]);
        assert_eq!(store.append(event("d")).unwrap(), 4);
    }

    #[test]
    fn torn_append_is_dropped_on_reopen() {
        let journal = MemoryJournal::new();
        {
            let store = EventStore::open(journal.clone()).unwrap();
            store.append(event("a")).unwrap();
        }
        let mut bytes = journal.bytes();
        let torn = JournalRecord::Append {
            index: 2,
            event_json: event("b").encode().unwrap(),
        }
        .to_frame()
        .unwrap();
        bytes.extend_from_slice(&torn[..torn.len() / 2]);

        let journal = MemoryJournal::with_data(bytes);
        let store = EventStore::open(journal.clone()).unwrap();
        assert_eq!(indices(&store.pending_envelopes(10).unwrap()), vec![1]);
        assert_eq!(store.append(event("b")).unwrap(), 2);

        let store = EventStore::open(journal).unwrap();
        assert_eq!(indices(&store.pending_envelopes(10).unwrap()), vec![1, 2]);
    }

    #[test]
    fn bundle_update_does_not_touch_envelopes_in_flight() {
        let store = EventStore::in_memory();
        let index = store.append(event("a").needing_bundle_hash()).unwrap();
        let before = store.pending_envelopes(1).unwrap();

        let metadata = BundleMetadata {
            hash: Some("bh".into()),
            binary_count: Some(4),
            ..BundleMetadata::default()
        };
        assert!(store.update_bundle_metadata(index, metadata).unwrap());

        let old = EventRecord::decode(before[0].json()).unwrap();
        assert!(old.needs_bundle_hash);
        assert!(old.bundle.hash.is_none());

        let after = store.pending_envelopes(1).unwrap();
        let new = EventRecord::decode(after[0].json()).unwrap();
        assert!(!new.needs_bundle_hash);
        assert_eq!(new.bundle.binary_count, Some(4));

        store.acknowledge(&[index]).unwrap();
        assert!(!store
            .update_bundle_metadata(index, BundleMetadata::default())
            .unwrap());
    }

    #[test]
    fn file_backed_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");
        {
            let store = EventStore::open_file(&path).unwrap();
            store.append(event("a")).unwrap();
            store.append(event("b")).unwrap();
        }
        let store = EventStore::open_file(&path).unwrap();
        assert_eq!(indices(&store.pending_envelopes(10).unwrap()), vec![1, 2]);
    }

    #[test]
    fn concurrent_appends_during_upload_are_retained() {
        let store = Arc::new(EventStore::in_memory());
        for i in 0..20 {
            store.append(event(&format!("seed{i}"))).unwrap();
        }

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.append(event(&format!("live{i}"))).unwrap();
                }
            })
        };

        let mut acked = BTreeSet::new();
        for _ in 0..50 {
            let batch = store.pending_envelopes(7).unwrap();
            let batch_indices = indices(&batch);
            store.acknowledge(&batch_indices).unwrap();
            acked.extend(batch_indices);
        }
        writer.join().unwrap();

        let remaining: BTreeSet<u64> = indices(&store.pending_envelopes(usize::MAX).unwrap())
            .into_iter()
            .collect();
        assert!(acked.is_disjoint(&remaining));
        assert_eq!(acked.len() + remaining.len(), 220);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append,
        Pending(usize),
        AckSnapshot(Vec<bool>),
        Reopen,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Append),
            2 => (1usize..6).prop_map(Op::Pending),
            2 => prop::collection::vec(any::<bool>(), 0..6).prop_map(Op::AckSnapshot),
            1 => Just(Op::Reopen),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever the interleaving, a later read sees every queued event
        /// that was never acknowledged, in insertion order.
        #[test]
        fn pending_never_omits_unacknowledged(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let journal = MemoryJournal::new();
            let mut store = EventStore::open(journal.clone()).unwrap();
            let mut model: BTreeSet<u64> = BTreeSet::new();
            let mut snapshot: Vec<u64> = Vec::new();

            for op in ops {
                match op {
                    Op::Append => {
                        let index = store.append(event("x")).unwrap();
                        prop_assert!(!model.contains(&index));
                        model.insert(index);
                    }
                    Op::Pending(limit) => {
                        snapshot = indices(&store.pending_envelopes(limit).unwrap());
                        let expected: Vec<u64> = model.iter().copied().take(limit).collect();
                        prop_assert_eq!(&snapshot, &expected);
                    }
                    Op::AckSnapshot(mask) => {
                        let chosen: Vec<u64> = snapshot
                            .iter()
                            .zip(mask.iter().chain(std::iter::repeat(&false)))
                            .filter(|(_, keep)| **keep)
                            .map(|(i, _)| *i)
                            .collect();
                        store.acknowledge(&chosen).unwrap();
                        for i in &chosen {
                            model.remove(i);
                        }
                    }
                    Op::Reopen => {
                        drop(store);
                        store = EventStore::open(journal.clone()).unwrap();
                    }
                }
            }

            let all = indices(&store.pending_envelopes(usize::MAX).unwrap());
            prop_assert_eq!(all, model.into_iter().collect::<Vec<_>>());
        }
    }
}
