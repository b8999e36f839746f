//! # santa-sync protocol
//!
//! Data model and wire messages exchanged with the sync server.
//!
//! This crate provides:
//! - [`EventRecord`] and [`PendingEventEnvelope`] for execution decisions
//! - [`RuleRecord`] with closed [`RuleType`] / [`RulePolicy`] enumerations
//! - [`SyncConfig`], the server-delivered policy snapshot
//! - [`SyncCursor`] for rule pagination
//! - Request/response messages for the config, rule and event endpoints
//!
//! Wire keys follow the names the existing sync servers expect
//! (`file_sha256`, `rule_type`, `clean_sync`, ...). Enumerated values are
//! parsed strictly: an unknown decision, policy or rule type is an error,
//! never a silent default.
//!
//! This is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod envelope;
mod error;
mod event;
mod messages;
mod rule;

pub use config::{
    bounded_interval, ClientMode, SyncConfig, DEFAULT_BACKOFF_INTERVAL_SECS,
    DEFAULT_EVENT_BATCH_SIZE, DEFAULT_FULL_SYNC_INTERVAL_SECS,
    DEFAULT_PUSH_FULL_SYNC_INTERVAL_SECS, DEFAULT_PUSH_GLOBAL_RULE_SYNC_DEADLINE_SECS,
    MAX_SYNC_INTERVAL_SECS, MIN_SYNC_INTERVAL_SECS,
};
pub use cursor::SyncCursor;
pub use envelope::PendingEventEnvelope;
pub use error::{ProtocolError, ProtocolResult};
pub use event::{BundleMetadata, Decision, EventRecord, QuarantineInfo, SigningCertificate};
pub use messages::{
    ConfigRequest, EventUploadRequest, EventUploadResponse, MachineInfo, RuleDownloadRequest,
    RuleDownloadResponse,
};
pub use rule::{RuleKey, RulePolicy, RuleRecord, RuleType};
