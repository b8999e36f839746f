//! HTTP transport implementation.
//!
//! Requests are JSON bodies POSTed to `{base}/{endpoint}/{serial}`. The
//! actual HTTP client is abstracted via [`HttpClient`] so the engine does
//! not depend on a particular HTTP library; the `santactl` binary plugs in
//! `reqwest` and the tests plug in [`LoopbackClient`].

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use santa_sync_protocol::{
    ConfigRequest, EventUploadRequest, EventUploadResponse, RuleDownloadRequest,
    RuleDownloadResponse, SyncConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// Config (preflight) endpoint.
pub const CONFIG_ENDPOINT: &str = "preflight";
/// Rule download endpoint.
pub const RULES_ENDPOINT: &str = "ruledownload";
/// Event upload endpoint.
pub const EVENTS_ENDPOINT: &str = "eventupload";

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response carrying `body`.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// A response with `status` and a plain-text reason.
    pub fn error(status: u16, reason: &str) -> Self {
        Self {
            status,
            body: reason.as_bytes().to_vec(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The deadline passed before a response arrived.
    Timeout,
    /// Connection, TLS or I/O failure.
    Connection(String),
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST with a JSON body and returns whatever the server answered.
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<HttpResponse, HttpError>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<HttpResponse, HttpError> {
        (**self).post(url, body, timeout)
    }
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com/santa").
    base_url: String,
    /// Machine serial appended to every endpoint.
    serial: String,
    /// HTTP client implementation.
    client: C,
    /// Per-request deadline.
    timeout: Duration,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, serial: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            serial: serial.into(),
            client,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Full URL of `endpoint` for this machine.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, endpoint, self.serial)
    }

    fn fail(&self, err: SyncError) -> SyncError {
        *self.last_error.write() = Some(err.to_string());
        err
    }

    fn post_json(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        let url = self.endpoint_url(endpoint);
        tracing::trace!(%url, len = body.len(), "POST");

        let response = self
            .client
            .post(&url, body, self.timeout)
            .map_err(|e| match e {
                HttpError::Timeout => self.fail(SyncError::Timeout),
                HttpError::Connection(message) => {
                    self.fail(SyncError::transport_retryable(message))
                }
            })?;

        if !response.is_success() {
            let message = String::from_utf8_lossy(&response.body).trim().to_string();
            return Err(self.fail(SyncError::from_status(response.status, message)));
        }

        *self.last_error.write() = None;
        Ok(response.body)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn fetch_config(&self, request: &ConfigRequest) -> SyncResult<SyncConfig> {
        let body = self.post_json(CONFIG_ENDPOINT, request.encode()?)?;
        SyncConfig::decode(&body).map_err(|e| self.fail(e.into()))
    }

    fn download_rules(&self, request: &RuleDownloadRequest) -> SyncResult<RuleDownloadResponse> {
        let body = self.post_json(RULES_ENDPOINT, request.encode()?)?;
        RuleDownloadResponse::decode(&body).map_err(|e| self.fail(e.into()))
    }

    fn upload_events(&self, request: &EventUploadRequest) -> SyncResult<EventUploadResponse> {
        let body = self.post_json(EVENTS_ENDPOINT, request.encode()?)?;
        EventUploadResponse::decode(&body).map_err(|e| self.fail(e.into()))
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST to `path` (everything after the host).
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<HttpResponse, HttpError>;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<HttpResponse, HttpError> {
        (**self).handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

fn url_path(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => url,
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<HttpResponse, HttpError> {
        self.server.handle_post(url_path(url), &body)
    }
}
