//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, MachineState, RequestHandler};
use crate::rule_log::RuleLog;
use parking_lot::Mutex;
use santa_sync_protocol::{
    ConfigRequest, EventRecord, EventUploadRequest, RuleDownloadRequest, RuleRecord,
};
use std::sync::Arc;

/// Sync endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `preflight`
    Config,
    /// `ruledownload`
    Rules,
    /// `eventupload`
    Events,
}

impl Endpoint {
    /// Parses a path segment.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "preflight" => Some(Endpoint::Config),
            "ruledownload" => Some(Endpoint::Rules),
            "eventupload" => Some(Endpoint::Events),
            _ => None,
        }
    }
}

/// Status and body the server answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    /// HTTP status code.
    pub status: u16,
    /// JSON body on success, plain-text reason otherwise.
    pub body: Vec<u8>,
}

impl ServerReply {
    fn from_error(err: &ServerError) -> Self {
        Self {
            status: err.status(),
            body: err.to_string().into_bytes(),
        }
    }
}

/// The sync server.
///
/// Holds every machine's state in memory and answers the three sync
/// endpoints. It does not listen on a socket: an HTTP front end, or a
/// loopback client in tests, hands it `(path, body)` pairs.
///
/// # Example
///
/// ```
/// use santa_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let body = br#"{"serial_num":"C02XYZ","hostname":"mac","santa_version":"2024.1",
///     "os_version":"14.4","os_build":"23E214","client_mode":"MONITOR",
///     "binary_rule_count":0,"certificate_rule_count":0}"#;
/// let reply = server.handle_post("/santa/preflight/C02XYZ", body);
/// assert_eq!(reply.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    faults: Mutex<Vec<(Endpoint, u16)>>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_rules(config, Arc::new(RuleLog::new()))
    }

    /// Creates a sync server over an existing rule log.
    pub fn with_rules(config: ServerConfig, rules: Arc<RuleLog>) -> Self {
        let context = Arc::new(HandlerContext::new(config, rules));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self {
            handler,
            context,
            faults: Mutex::new(Vec::new()),
        }
    }

    /// The rule log.
    pub fn rules(&self) -> &RuleLog {
        &self.context.rules
    }

    /// Appends rule changes for every machine.
    pub fn publish_rules(&self, rules: impl IntoIterator<Item = RuleRecord>) -> usize {
        self.context.rules.publish(rules)
    }

    /// Flags `serial` for a clean sync.
    pub fn request_clean_sync(&self, serial: &str) {
        self.context.request_clean_sync(serial);
    }

    /// Refuses every request from `serial`.
    pub fn revoke(&self, serial: &str) {
        self.context.revoke(serial);
    }

    /// Lifts a revocation.
    pub fn restore(&self, serial: &str) {
        self.context.restore(serial);
    }

    /// Accepts at most `limit` events per upload.
    pub fn set_accept_limit(&self, limit: Option<usize>) {
        self.context.set_accept_limit(limit);
    }

    /// Replaces the config template.
    pub fn set_config(&self, config: ServerConfig) {
        *self.context.config.write() = config;
    }

    /// Makes the next request to `endpoint` fail with `status`.
    ///
    /// Faults queue up: calling this twice fails the next two requests.
    pub fn fail_next(&self, endpoint: Endpoint, status: u16) {
        self.faults.lock().push((endpoint, status));
    }

    /// Snapshot of a machine's state.
    pub fn machine(&self, serial: &str) -> Option<MachineState> {
        self.context.machine(serial)
    }

    /// Events received from `serial`, in index order.
    pub fn received_events(&self, serial: &str) -> Vec<EventRecord> {
        self.machine(serial)
            .map(|m| m.events.into_values().collect())
            .unwrap_or_default()
    }

    /// Handles a POST to `path`, which ends in `/{endpoint}/{serial}`.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerReply {
        match self.route(path, body) {
            Ok(body) => ServerReply { status: 200, body },
            Err(err) => {
                if err.is_server_error() {
                    tracing::warn!(%path, error = %err, "request failed");
                } else {
                    tracing::debug!(%path, error = %err, "request refused");
                }
                ServerReply::from_error(&err)
            }
        }
    }

    fn route(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let mut segments = path.trim_end_matches('/').rsplit('/');
        let serial = segments.next().unwrap_or_default();
        let endpoint = segments
            .next()
            .and_then(Endpoint::from_segment)
            .ok_or_else(|| ServerError::NotFound(path.to_string()))?;
        if serial.is_empty() {
            return Err(ServerError::NotFound(path.to_string()));
        }

        self.take_fault(endpoint)?;

        match endpoint {
            Endpoint::Config => {
                let request = ConfigRequest::decode(body)?;
                let config = self.handler.handle_config(serial, request)?;
                Ok(config.encode()?)
            }
            Endpoint::Rules => {
                let request = RuleDownloadRequest::decode(body)?;
                let page = self.handler.handle_rules(serial, request)?;
                Ok(page.encode()?)
            }
            Endpoint::Events => {
                let events = EventUploadRequest::decode_events(body)?;
                let response = self.handler.handle_events(serial, events)?;
                Ok(response.encode()?)
            }
        }
    }

    fn take_fault(&self, endpoint: Endpoint) -> ServerResult<()> {
        let mut faults = self.faults.lock();
        match faults.iter().position(|(e, _)| *e == endpoint) {
            Some(i) => Err(ServerError::Injected(faults.remove(i).1)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use santa_sync_protocol::{
        ClientMode, Decision, EventUploadResponse, MachineInfo, PendingEventEnvelope,
        RuleDownloadResponse, RulePolicy, RuleType, SyncConfig, SyncCursor,
    };

    fn config_body() -> Vec<u8> {
        ConfigRequest {
            machine: MachineInfo {
                serial: "C02".into(),
                ..MachineInfo::default()
            },
            client_mode: ClientMode::Monitor,
            binary_rule_count: 0,
            certificate_rule_count: 0,
            request_clean_sync: false,
        }
        .encode()
        .unwrap()
    }

    fn events_body(indices: &[u64]) -> Vec<u8> {
        let envelopes = indices
            .iter()
            .map(|&i| {
                let mut event = EventRecord::new(format!("h{i}"), "/bin/x", Decision::AllowBinary, 0.0);
                event.index = i;
                PendingEventEnvelope::from_event(&event).unwrap()
            })
            .collect();
        EventUploadRequest::new(envelopes).encode().unwrap()
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::new(ServerConfig::default().with_rule_page_size(1));
        server.publish_rules([
            RuleRecord::new("h1", RuleType::Binary, RulePolicy::Whitelist),
            RuleRecord::new("h2", RuleType::Binary, RulePolicy::Blacklist),
        ]);

        // 1. Config
        let reply = server.handle_post("/preflight/C02", &config_body());
        assert_eq!(reply.status, 200);
        let config = SyncConfig::decode(&reply.body).unwrap();
        assert_eq!(config.binary_rule_count, Some(2));

        // 2. Rules, two pages
        let body = RuleDownloadRequest::new(SyncCursor::start()).encode().unwrap();
        let page = RuleDownloadResponse::decode(&server.handle_post("/ruledownload/C02", &body).body).unwrap();
        let next = page.next_cursor().unwrap().clone();
        let body = RuleDownloadRequest::new(next).encode().unwrap();
        let page = RuleDownloadResponse::decode(&server.handle_post("/ruledownload/C02", &body).body).unwrap();
        assert!(page.next_cursor().is_none());

        // 3. Events
        let reply = server.handle_post("/eventupload/C02", &events_body(&[1, 2]));
        assert_eq!(reply.status, 200);
        assert_eq!(EventUploadResponse::decode(&reply.body).unwrap().accepted_indices, None);
        assert_eq!(server.received_events("C02").len(), 2);
    }

    #[test]
    fn unknown_paths_are_404() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.handle_post("/nope/C02", b"{}").status, 404);
        assert_eq!(server.handle_post("/preflight/", b"{}").status, 404);
        assert_eq!(server.handle_post("", b"{}").status, 404);
    }

    #[test]
    fn malformed_body_is_400() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.handle_post("/eventupload/C02", b"not json").status, 400);
    }

    #[test]
    fn faults_apply_to_their_endpoint_once() {
        let server = SyncServer::new(ServerConfig::default());
        server.fail_next(Endpoint::Events, 503);

        assert_eq!(server.handle_post("/preflight/C02", &config_body()).status, 200);
        assert_eq!(server.handle_post("/eventupload/C02", &events_body(&[1])).status, 503);
        assert_eq!(server.handle_post("/eventupload/C02", &events_body(&[1])).status, 200);
    }

    #[test]
    fn revoked_machine_gets_403_body() {
        let server = SyncServer::new(ServerConfig::default());
        server.revoke("C02");
        let reply = server.handle_post("/santa/preflight/C02", &config_body());
        assert_eq!(reply.status, 403);
        assert!(String::from_utf8(reply.body).unwrap().contains("revoked"));
    }
}
