//! CLI command implementations.

pub mod daemon;
pub mod pending;
pub mod status;
pub mod sync;

use crate::error::CliError;
use crate::http::ReqwestClient;
use santa_sync_engine::{ClientConfig, HttpTransport, SyncOrchestrator};
use santa_sync_protocol::MachineInfo;
use santa_sync_store::LocalStore;
use std::path::Path;

/// Orchestrator talking to the real server over HTTP.
pub type HttpOrchestrator = SyncOrchestrator<HttpTransport<ReqwestClient>>;

/// Opened state directory and an orchestrator over it.
pub struct Setup {
    /// Keeps the directory locked.
    pub store: LocalStore,
    /// Session driver.
    pub orchestrator: HttpOrchestrator,
}

impl Setup {
    /// Opens `state_dir` and connects an orchestrator to `server`.
    pub fn new(state_dir: &Path, server: &str, machine: MachineInfo) -> Result<Self, CliError> {
        let store = LocalStore::open(state_dir)?;
        let client = ClientConfig::new(server, machine);
        let transport = HttpTransport::new(client.server_url.clone(), client.serial(), ReqwestClient::new()?)
            .with_timeout(client.timeout);
        let orchestrator = SyncOrchestrator::new(
            client,
            transport,
            store.events(),
            store.rules(),
            store.state(),
        );
        Ok(Self {
            store,
            orchestrator,
        })
    }
}

/// Formats seconds since the Unix epoch as an age, e.g. "5m ago".
pub fn format_age(then: u64, now: u64) -> String {
    let secs = now.saturating_sub(then);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages() {
        assert_eq!(format_age(100, 130), "30s ago");
        assert_eq!(format_age(0, 600), "10m ago");
        assert_eq!(format_age(0, 7200), "2h ago");
        assert_eq!(format_age(0, 3 * 86_400), "3d ago");
        assert_eq!(format_age(500, 100), "0s ago");
    }
}
