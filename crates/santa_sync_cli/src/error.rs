//! CLI error type.

use santa_sync_engine::SyncError;
use santa_sync_store::StoreError;
use thiserror::Error;

/// Errors reported by `santactl` commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A flag the command needs was not given.
    #[error("{0} is required for this command")]
    MissingArg(&'static str),

    /// The state directory could not be opened or read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A sync session failed.
    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    /// The HTTP client could not be built.
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    /// Output could not be rendered.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The async runtime could not be started.
    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
