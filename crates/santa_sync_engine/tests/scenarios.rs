//! Session scenarios against a scripted transport.

use proptest::prelude::*;
use santa_sync_engine::{
    BatchUploader, ClientConfig, MockTransport, RuleApplier, SessionKind, SyncError,
    SyncOrchestrator, UploadResult,
};
use santa_sync_protocol::{
    Decision, EventRecord, EventUploadResponse, MachineInfo, RuleDownloadResponse, RuleKey,
    RulePolicy, RuleRecord, RuleType, SyncConfig, SyncCursor,
};
use santa_sync_store::{
    EventStore, MemoryStateStore, RuleSet, RuleStore, RuleTable, StateStore, SyncEngineState,
};
use std::sync::Arc;

struct Client {
    events: Arc<EventStore>,
    rules: Arc<RuleTable>,
    states: Arc<MemoryStateStore>,
    orchestrator: SyncOrchestrator<MockTransport>,
}

fn client(transport: MockTransport) -> Client {
    let events = Arc::new(EventStore::in_memory());
    let rules = Arc::new(RuleTable::in_memory());
    let states = Arc::new(MemoryStateStore::new());
    let orchestrator = SyncOrchestrator::new(
        ClientConfig::new("https://sync.example.com", MachineInfo::default()),
        transport,
        Arc::clone(&events),
        rules.clone(),
        states.clone(),
    );
    Client {
        events,
        rules,
        states,
        orchestrator,
    }
}

fn event(hash: &str) -> EventRecord {
    EventRecord::new(hash, format!("/usr/local/bin/{hash}"), Decision::BlockUnknown, 1.7e9)
}

fn binary(hash: &str, policy: RulePolicy) -> RuleRecord {
    RuleRecord::new(hash, RuleType::Binary, policy)
}

fn key(hash: &str) -> RuleKey {
    RuleKey::new(hash, RuleType::Binary)
}

fn batch_size(n: u32) -> SyncConfig {
    SyncConfig {
        batch_size: Some(n),
        ..SyncConfig::default()
    }
}

#[test]
fn scenario_a_full_acceptance_in_two_batches() {
    let transport = MockTransport::new();
    transport.set_default_config(batch_size(2));
    let client = client(transport);
    for hash in ["e1", "e2", "e3"] {
        client.events.append(event(hash)).unwrap();
    }

    let report = client.orchestrator.run_session(SessionKind::Full).unwrap();

    let sent: Vec<Vec<u64>> = client
        .orchestrator
        .transport()
        .upload_requests()
        .iter()
        .map(|r| r.indices())
        .collect();
    assert_eq!(sent, vec![vec![1, 2], vec![3]]);
    assert_eq!(client.events.pending_count(), 0);
    assert!(!report.needs_retry());
}

#[test]
fn scenario_b_partial_acceptance_keeps_rejected_event() {
    let transport = MockTransport::new();
    transport.set_default_config(batch_size(2));
    transport.push_upload_reply(Ok(EventUploadResponse::partial(vec![1])));
    let client = client(transport);
    client.events.append(event("e1")).unwrap();
    client.events.append(event("e2")).unwrap();

    let report = client.orchestrator.run_session(SessionKind::Full).unwrap();

    assert!(report.needs_retry());
    let pending = client.events.pending_envelopes(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].index(), 2);
    assert_eq!(client.orchestrator.transport().upload_requests().len(), 1);
}

#[test]
fn scenario_c_rule_failure_resumes_from_committed_cursor() {
    let transport = MockTransport::new();
    transport.push_rule_page(Ok(RuleDownloadResponse::page(
        vec![binary("h1", RulePolicy::Whitelist)],
        "c1",
    )));
    transport.push_rule_page(Err(SyncError::transport_retryable("connection reset")));
    let client = client(transport);
    client.events.append(event("e1")).unwrap();

    let err = client.orchestrator.run_session(SessionKind::Full).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(client.states.load().unwrap().cursor, SyncCursor::new("c1"));
    assert!(client.rules.lookup(&key("h1")).is_some());
    // The event phase never ran.
    assert!(client.orchestrator.transport().upload_requests().is_empty());

    client.orchestrator.run_session(SessionKind::Full).unwrap();
    let cursors: Vec<SyncCursor> = client
        .orchestrator
        .transport()
        .rule_requests()
        .into_iter()
        .map(|r| r.cursor)
        .collect();
    assert_eq!(
        cursors,
        vec![SyncCursor::start(), SyncCursor::new("c1"), SyncCursor::new("c1")]
    );
    assert_eq!(client.events.pending_count(), 0);
}

#[test]
fn scenario_d_clean_sync_drops_rules_missing_from_stream() {
    let transport = MockTransport::new();
    transport.push_config(Ok(SyncConfig {
        clean_sync: true,
        ..SyncConfig::default()
    }));
    transport.push_rule_page(Ok(RuleDownloadResponse::last(vec![binary(
        "h1",
        RulePolicy::Whitelist,
    )])));
    let client = client(transport);
    client
        .rules
        .apply_page(&[binary("h0", RulePolicy::Blacklist)])
        .unwrap();
    client
        .states
        .save(&SyncEngineState {
            cursor: SyncCursor::new("c9"),
            ..SyncEngineState::default()
        })
        .unwrap();

    let report = client.orchestrator.run_session(SessionKind::Full).unwrap();

    assert!(report.rules.clean);
    assert!(client.orchestrator.transport().rule_requests()[0].cursor.is_start());
    let rules = client.rules.snapshot();
    assert_eq!(rules.len(), 1);
    assert!(rules.contains(&key("h1")));
}

#[test]
fn event_phase_retry_resends_the_same_batch() {
    let transport = MockTransport::new();
    transport.push_upload_reply(Err(SyncError::Timeout));
    let events = EventStore::in_memory();
    for hash in ["e1", "e2", "e3"] {
        events.append(event(hash)).unwrap();
    }
    let config = batch_size(2);

    let first = BatchUploader::new(&transport, &events).upload(&config);
    assert!(matches!(first, UploadResult::Failed { acknowledged: 0, .. }));
    let second = BatchUploader::new(&transport, &events).upload(&config);
    assert!(matches!(second, UploadResult::Complete { acknowledged: 3, .. }));

    let requests = transport.upload_requests();
    assert_eq!(requests[0].indices(), requests[1].indices());
    assert_eq!(requests[0].encode().unwrap(), requests[1].encode().unwrap());
}

#[test]
fn storage_failure_is_reported_not_swallowed() {
    struct BrokenRules;
    impl RuleStore for BrokenRules {
        fn apply_page(&self, _page: &[RuleRecord]) -> santa_sync_store::StoreResult<santa_sync_store::RulePageStats> {
            Err(santa_sync_store::StoreError::InvalidRule("disk full".into()))
        }
        fn replace(&self, _rules: RuleSet) -> santa_sync_store::StoreResult<()> {
            Ok(())
        }
        fn lookup(&self, _key: &RuleKey) -> Option<santa_sync_store::StoredRule> {
            None
        }
        fn counts(&self) -> santa_sync_store::RuleCounts {
            santa_sync_store::RuleCounts::default()
        }
        fn snapshot(&self) -> RuleSet {
            RuleSet::new()
        }
    }

    let transport = MockTransport::new();
    transport.push_rule_page(Ok(RuleDownloadResponse::page(
        vec![binary("h1", RulePolicy::Whitelist)],
        "c1",
    )));
    let states = MemoryStateStore::new();
    let mut state = SyncEngineState::default();

    let err = RuleApplier::new(&transport, &BrokenRules, &states)
        .apply_rules(&mut state, false)
        .unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert!(state.cursor.is_start());
}

fn rule_strategy() -> impl Strategy<Value = RuleRecord> {
    (
        0u8..6,
        prop_oneof![Just(RuleType::Binary), Just(RuleType::Certificate)],
        prop_oneof![
            Just(RulePolicy::Whitelist),
            Just(RulePolicy::Blacklist),
            Just(RulePolicy::SilentBlacklist),
            Just(RulePolicy::Remove),
        ],
    )
        .prop_map(|(hash, rule_type, policy)| RuleRecord::new(format!("h{hash}"), rule_type, policy))
}

fn paged(pages: &[Vec<RuleRecord>], from: usize) -> Vec<RuleDownloadResponse> {
    (from..pages.len())
        .map(|i| {
            if i + 1 == pages.len() {
                RuleDownloadResponse::last(pages[i].clone())
            } else {
                RuleDownloadResponse::page(pages[i].clone(), format!("c{}", i + 1))
            }
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A rule phase interrupted at any page and resumed, with or without
    /// re-applying the last page, ends with the same rules as an
    /// uninterrupted one.
    #[test]
    fn interrupted_rule_sync_converges(
        pages in prop::collection::vec(prop::collection::vec(rule_strategy(), 0..5), 2..6),
        fail_at in 1usize..6,
        refetch in any::<bool>(),
    ) {
        let fail_at = fail_at.min(pages.len() - 1);
        let expected: RuleSet = pages.iter().flatten().cloned().collect();

        let transport = MockTransport::new();
        for page in paged(&pages, 0).into_iter().take(fail_at) {
            transport.push_rule_page(Ok(page));
        }
        transport.push_rule_page(Err(SyncError::Timeout));

        let rules = RuleTable::in_memory();
        let states = MemoryStateStore::new();
        let mut state = SyncEngineState::default();
        let applier = RuleApplier::new(&transport, &rules, &states);
        prop_assert!(applier.apply_rules(&mut state, false).is_err());
        prop_assert_eq!(&states.load().unwrap().cursor, &SyncCursor::new(format!("c{fail_at}")));

        let mut state = states.load().unwrap();
        let resume_from = if refetch {
            // The cursor save after the last applied page was lost.
            state.cursor = match fail_at - 1 {
                0 => SyncCursor::start(),
                n => SyncCursor::new(format!("c{n}")),
            };
            fail_at - 1
        } else {
            fail_at
        };
        for page in paged(&pages, resume_from) {
            transport.push_rule_page(Ok(page));
        }
        prop_assert!(applier.apply_rules(&mut state, false).is_ok());

        prop_assert_eq!(rules.snapshot(), expected);
    }
}
