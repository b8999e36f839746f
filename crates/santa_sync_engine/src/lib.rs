//! # santa-sync engine
//!
//! Client-side synchronization of execution events and rules with a
//! management server.
//!
//! This crate provides:
//! - The session state machine (idle → config → rules → events → logs)
//! - Cursor-driven rule download with atomic page application
//! - Batched, at-least-once event upload with partial acceptance
//! - Backoff after failures, constant by default
//! - A tokio scheduler for periodic, push and operator triggers
//! - HTTP/JSON transport abstraction
//!
//! ## Architecture
//!
//! A session runs its phases strictly in order:
//! 1. Fetch the server config (mode, batch size, intervals, clean sync)
//! 2. Download rule pages from the saved cursor and apply them
//! 3. Upload queued events in batches and acknowledge what was accepted
//! 4. Upload logs if the server asked for them
//!
//! A phase runs only if every earlier phase succeeded. Work an earlier
//! phase committed is never rolled back.
//!
//! ## Key Invariants
//!
//! - One session at a time
//! - An event is removed locally only after the server accepted it
//! - A rule page and its next cursor commit together or not at all
//! - A clean sync replaces the local rules only once the stream is complete

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod config;
mod error;
mod http;
mod logs;
mod orchestrator;
mod rules;
mod scheduler;
mod transport;
mod uploader;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::ClientConfig;
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpError, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    CONFIG_ENDPOINT, EVENTS_ENDPOINT, RULES_ENDPOINT,
};
pub use logs::{FileLogUploader, LogUploader, NoLogUploader};
pub use orchestrator::{
    SessionKind, SessionReport, SyncOrchestrator, SyncPhase, SyncStats, SyncStatus,
};
pub use santa_sync_store::SessionOutcome;
pub use rules::{RuleApplier, RuleSyncResult};
pub use scheduler::{PushMessage, Scheduler, SchedulerHandle, SyncCommand};
pub use transport::{MockTransport, SyncTransport, UnreachableTransport};
pub use uploader::{BatchUploader, UploadResult};
