//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use santa_sync_protocol::{
    ConfigRequest, EventUploadRequest, EventUploadResponse, RuleDownloadRequest,
    RuleDownloadResponse, SyncConfig,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// A sync transport handles network communication with the sync server.
///
/// Each method is one request with its own deadline. Implementations report
/// a missed deadline as [`SyncError::Timeout`].
pub trait SyncTransport: Send + Sync {
    /// Fetches the server's policy for this machine.
    fn fetch_config(&self, request: &ConfigRequest) -> SyncResult<SyncConfig>;

    /// Fetches one page of rules.
    fn download_rules(&self, request: &RuleDownloadRequest) -> SyncResult<RuleDownloadResponse>;

    /// Uploads one batch of events.
    fn upload_events(&self, request: &EventUploadRequest) -> SyncResult<EventUploadResponse>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn fetch_config(&self, request: &ConfigRequest) -> SyncResult<SyncConfig> {
        (**self).fetch_config(request)
    }

    fn download_rules(&self, request: &RuleDownloadRequest) -> SyncResult<RuleDownloadResponse> {
        (**self).download_rules(request)
    }

    fn upload_events(&self, request: &EventUploadRequest) -> SyncResult<EventUploadResponse> {
        (**self).upload_events(request)
    }
}

/// A scripted transport for testing.
///
/// Replies are queued per endpoint and consumed in order. When a queue is
/// empty the transport answers with the default config, an empty last rule
/// page, or full acceptance. Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    default_config: Mutex<SyncConfig>,
    config_replies: Mutex<VecDeque<SyncResult<SyncConfig>>>,
    rule_replies: Mutex<VecDeque<SyncResult<RuleDownloadResponse>>>,
    upload_replies: Mutex<VecDeque<SyncResult<EventUploadResponse>>>,
    config_requests: Mutex<Vec<ConfigRequest>>,
    rule_requests: Mutex<Vec<RuleDownloadRequest>>,
    upload_requests: Mutex<Vec<EventUploadRequest>>,
}

impl MockTransport {
    /// Creates a transport with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the config returned once the config queue is empty.
    pub fn set_default_config(&self, config: SyncConfig) {
        *self.default_config.lock() = config;
    }

    /// Queues a config reply.
    pub fn push_config(&self, reply: SyncResult<SyncConfig>) {
        self.config_replies.lock().push_back(reply);
    }

    /// Queues a rule page reply.
    pub fn push_rule_page(&self, reply: SyncResult<RuleDownloadResponse>) {
        self.rule_replies.lock().push_back(reply);
    }

    /// Queues an upload reply.
    pub fn push_upload_reply(&self, reply: SyncResult<EventUploadResponse>) {
        self.upload_replies.lock().push_back(reply);
    }

    /// Config requests received so far.
    pub fn config_requests(&self) -> Vec<ConfigRequest> {
        self.config_requests.lock().clone()
    }

    /// Rule requests received so far.
    pub fn rule_requests(&self) -> Vec<RuleDownloadRequest> {
        self.rule_requests.lock().clone()
    }

    /// Upload requests received so far.
    pub fn upload_requests(&self) -> Vec<EventUploadRequest> {
        self.upload_requests.lock().clone()
    }
}

impl SyncTransport for MockTransport {
    fn fetch_config(&self, request: &ConfigRequest) -> SyncResult<SyncConfig> {
        self.config_requests.lock().push(request.clone());
        match self.config_replies.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(self.default_config.lock().clone()),
        }
    }

    fn download_rules(&self, request: &RuleDownloadRequest) -> SyncResult<RuleDownloadResponse> {
        self.rule_requests.lock().push(request.clone());
        self.rule_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(RuleDownloadResponse::last(Vec::new())))
    }

    fn upload_events(&self, request: &EventUploadRequest) -> SyncResult<EventUploadResponse> {
        self.upload_requests.lock().push(request.clone());
        self.upload_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(EventUploadResponse::all_accepted()))
    }
}

/// A transport whose every call fails, for exercising failure paths.
#[derive(Debug, Default)]
pub struct UnreachableTransport;

impl SyncTransport for UnreachableTransport {
    fn fetch_config(&self, _request: &ConfigRequest) -> SyncResult<SyncConfig> {
        Err(SyncError::transport_retryable("server unreachable"))
    }

    fn download_rules(&self, _request: &RuleDownloadRequest) -> SyncResult<RuleDownloadResponse> {
        Err(SyncError::transport_retryable("server unreachable"))
    }

    fn upload_events(&self, _request: &EventUploadRequest) -> SyncResult<EventUploadResponse> {
        Err(SyncError::transport_retryable("server unreachable"))
    }
}
