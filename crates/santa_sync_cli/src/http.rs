//! `reqwest`-backed [`HttpClient`].

use reqwest::header::CONTENT_TYPE;
use santa_sync_engine::{HttpClient, HttpError, HttpResponse};
use std::time::Duration;

/// Blocking HTTP client for the sync transport.
///
/// Must be created outside the tokio runtime; sessions call it from the
/// blocking pool.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("santactl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<HttpResponse, HttpError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().map_err(map_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

fn map_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Connection(e.to_string())
    }
}
