//! Server configuration.

use santa_sync_protocol::SyncConfig;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Rules per download page.
    pub rule_page_size: usize,
    /// Largest event batch accepted in one upload.
    pub max_event_batch: usize,
    /// Config sent to every machine. `clean_sync` is set per request.
    pub sync_config: SyncConfig,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            rule_page_size: 100,
            max_event_batch: 500,
            sync_config: SyncConfig::default(),
        }
    }

    /// Sets the rule page size.
    pub fn with_rule_page_size(mut self, size: usize) -> Self {
        self.rule_page_size = size.max(1);
        self
    }

    /// Sets the largest accepted event batch.
    pub fn with_max_event_batch(mut self, size: usize) -> Self {
        self.max_event_batch = size;
        self
    }

    /// Sets the config template.
    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
