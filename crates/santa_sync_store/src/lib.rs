//! # santa-sync store
//!
//! Local state shared by the execution monitor and the sync engine.
//!
//! - [`EventStore`]: the queue of recorded execution events. The monitor
//!   appends from its own threads at any time; the uploader reads
//!   [`PendingEventEnvelope`](santa_sync_protocol::PendingEventEnvelope)
//!   snapshots and acknowledges indices the server accepted. All access is
//!   internally synchronized.
//! - [`RuleTable`]: the local rule set, keyed by `(hash, rule_type)`, with
//!   all-or-nothing page application.
//! - [`SyncEngineState`]: cursor, last server config and flags, loaded and
//!   saved explicitly through a [`StateStore`].
//! - [`LocalStore`]: all of the above opened from one locked directory.
//!
//! ## Invariants
//!
//! - An event leaves the queue only through `acknowledge`
//! - Event indices are never reused while the event is queued
//! - A rule page either takes effect completely or not at all

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event_store;
mod local;
mod rules;
mod state;

pub use error::{StoreError, StoreResult};
pub use event_store::EventStore;
pub use local::LocalStore;
pub use rules::{RuleCounts, RulePageStats, RuleSet, RuleStore, RuleTable, StoredRule};
pub use state::{FileStateStore, MemoryStateStore, SessionOutcome, StateStore, SyncEngineState};
