//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::rule_log::RuleLog;
use parking_lot::RwLock;
use santa_sync_protocol::{
    ConfigRequest, EventRecord, EventUploadResponse, RuleDownloadRequest, RuleDownloadResponse,
    SyncConfig,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// What the server knows about one machine.
#[derive(Debug, Clone, Default)]
pub struct MachineState {
    /// Body of the most recent config request.
    pub last_config_request: Option<ConfigRequest>,
    /// Config requests received.
    pub config_requests: u64,
    /// An administrator asked this machine to clean sync.
    pub clean_sync_pending: bool,
    /// Events received, by client index. Redelivered events overwrite.
    pub events: BTreeMap<u64, EventRecord>,
    /// Event upload requests received.
    pub event_uploads: u64,
}

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: RwLock<ServerConfig>,
    /// Published rules (shared by every machine).
    pub rules: Arc<RuleLog>,
    machines: RwLock<HashMap<String, MachineState>>,
    revoked: RwLock<HashSet<String>>,
    accept_limit: RwLock<Option<usize>>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, rules: Arc<RuleLog>) -> Self {
        Self {
            config: RwLock::new(config),
            rules,
            machines: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashSet::new()),
            accept_limit: RwLock::new(None),
        }
    }

    /// Snapshot of a machine's state.
    pub fn machine(&self, serial: &str) -> Option<MachineState> {
        self.machines.read().get(serial).cloned()
    }

    /// Flags `serial` for a clean sync on its next config request.
    pub fn request_clean_sync(&self, serial: &str) {
        self.machines
            .write()
            .entry(serial.to_string())
            .or_default()
            .clean_sync_pending = true;
    }

    /// Refuses every request from `serial` with 403.
    pub fn revoke(&self, serial: &str) {
        self.revoked.write().insert(serial.to_string());
    }

    /// Lifts a revocation.
    pub fn restore(&self, serial: &str) {
        self.revoked.write().remove(serial);
    }

    /// Accepts at most `limit` events per upload; `None` accepts all.
    pub fn set_accept_limit(&self, limit: Option<usize>) {
        *self.accept_limit.write() = limit;
    }

    fn check_allowed(&self, serial: &str) -> ServerResult<()> {
        if self.revoked.read().contains(serial) {
            return Err(ServerError::Revoked(serial.to_string()));
        }
        Ok(())
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a config (preflight) request.
    pub fn handle_config(&self, serial: &str, request: ConfigRequest) -> ServerResult<SyncConfig> {
        self.context.check_allowed(serial)?;

        let clean_sync = {
            let mut machines = self.context.machines.write();
            let machine = machines.entry(serial.to_string()).or_default();
            let clean = machine.clean_sync_pending || request.request_clean_sync;
            machine.clean_sync_pending = false;
            machine.config_requests += 1;
            machine.last_config_request = Some(request);
            clean
        };

        let (binary, certificate) = self.context.rules.counts();
        let mut config = self.context.config.read().sync_config.clone();
        config.clean_sync = clean_sync;
        config.binary_rule_count = Some(binary);
        config.certificate_rule_count = Some(certificate);
        tracing::debug!(%serial, clean_sync, "config served");
        Ok(config)
    }

    /// Handles a rule download request.
    pub fn handle_rules(
        &self,
        serial: &str,
        request: RuleDownloadRequest,
    ) -> ServerResult<RuleDownloadResponse> {
        self.context.check_allowed(serial)?;
        let limit = self.context.config.read().rule_page_size;
        self.context.rules.page(&request.cursor, limit)
    }

    /// Handles an event upload.
    pub fn handle_events(
        &self,
        serial: &str,
        events: Vec<EventRecord>,
    ) -> ServerResult<EventUploadResponse> {
        self.context.check_allowed(serial)?;

        let max = self.context.config.read().max_event_batch;
        if events.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many events: {} > {max}",
                events.len()
            )));
        }

        let limit = *self.context.accept_limit.read();
        let accepted: Vec<EventRecord> = match limit {
            Some(limit) => events.into_iter().take(limit).collect(),
            None => events,
        };
        let partial = limit.is_some();
        let indices: Vec<u64> = accepted.iter().map(|e| e.index).collect();

        let mut machines = self.context.machines.write();
        let machine = machines.entry(serial.to_string()).or_default();
        machine.event_uploads += 1;
        for event in accepted {
            machine.events.insert(event.index, event);
        }
        tracing::debug!(%serial, accepted = indices.len(), "events received");

        if partial {
            Ok(EventUploadResponse::partial(indices))
        } else {
            Ok(EventUploadResponse::all_accepted())
        }
    }
}
