//! Client-side configuration for the sync engine.

use crate::backoff::BackoffPolicy;
use santa_sync_protocol::{MachineInfo, DEFAULT_BACKOFF_INTERVAL_SECS};
use std::time::Duration;

/// Settings that come from the host rather than from the sync server.
///
/// Policy values the server sends (batch size, intervals, mode) live in
/// [`santa_sync_protocol::SyncConfig`]. The values here are used when the
/// server omits them or before the first config has been fetched.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the sync server, without the endpoint path.
    pub server_url: String,
    /// Identity reported in every config request.
    pub machine: MachineInfo,
    /// Deadline for each network call.
    pub timeout: Duration,
    /// Delay after a failed session when the server sent no `backoff`.
    pub default_backoff: Duration,
    /// Growth of the backoff delay across consecutive failures.
    pub backoff_policy: BackoffPolicy,
}

impl ClientConfig {
    /// Creates a configuration for `machine` talking to `server_url`.
    pub fn new(server_url: impl Into<String>, machine: MachineInfo) -> Self {
        Self {
            server_url: server_url.into(),
            machine,
            timeout: Duration::from_secs(30),
            default_backoff: Duration::from_secs(DEFAULT_BACKOFF_INTERVAL_SECS),
            backoff_policy: BackoffPolicy::Constant,
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the fallback backoff interval.
    pub fn with_default_backoff(mut self, backoff: Duration) -> Self {
        self.default_backoff = backoff;
        self
    }

    /// Sets the backoff growth policy.
    pub fn with_backoff_policy(mut self, policy: BackoffPolicy) -> Self {
        self.backoff_policy = policy;
        self
    }

    /// The machine serial, which is also the last path segment of every
    /// endpoint.
    pub fn serial(&self) -> &str {
        &self.machine.serial
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("", MachineInfo::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let machine = MachineInfo {
            serial: "C02ABC".into(),
            ..MachineInfo::default()
        };
        let config = ClientConfig::new("https://sync.example.com/santa", machine)
            .with_timeout(Duration::from_secs(5))
            .with_default_backoff(Duration::from_secs(60))
            .with_backoff_policy(BackoffPolicy::Exponential {
                max: Duration::from_secs(3600),
            });

        assert_eq!(config.server_url, "https://sync.example.com/santa");
        assert_eq!(config.serial(), "C02ABC");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.default_backoff, Duration::from_secs(60));
        assert!(matches!(config.backoff_policy, BackoffPolicy::Exponential { .. }));
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.default_backoff, Duration::from_secs(300));
        assert_eq!(config.backoff_policy, BackoffPolicy::Constant);
    }
}
