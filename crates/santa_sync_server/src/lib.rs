//! # santa-sync server
//!
//! Reference in-memory sync server.
//!
//! This crate provides:
//! - The config (`preflight`), rule download and event upload endpoints
//! - A shared, append-only [`RuleLog`] paginated by cursor
//! - Per-machine state: clean sync flags, received events, revocation
//! - Partial acceptance and failure injection for exercising clients
//!
//! The server keeps no state on disk and does not bind a socket. Callers
//! hand it a path and a JSON body through [`SyncServer::handle_post`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod rule_log;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, MachineState, RequestHandler};
pub use rule_log::RuleLog;
pub use server::{Endpoint, ServerReply, SyncServer};
