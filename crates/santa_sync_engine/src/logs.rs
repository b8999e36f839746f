//! Log phase collaborator.

use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpError};
use std::path::PathBuf;
use std::time::Duration;

/// Uploads diagnostic logs to the URL the server supplied.
pub trait LogUploader: Send + Sync {
    /// Uploads logs to `url`.
    fn upload_logs(&self, url: &str) -> SyncResult<()>;
}

/// A log uploader that uploads nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLogUploader;

impl LogUploader for NoLogUploader {
    fn upload_logs(&self, url: &str) -> SyncResult<()> {
        tracing::debug!(%url, "log upload requested but no log uploader is configured");
        Ok(())
    }
}

/// POSTs the contents of a fixed list of log files, one request per file.
///
/// Missing files are skipped.
pub struct FileLogUploader<C: HttpClient> {
    client: C,
    paths: Vec<PathBuf>,
    timeout: Duration,
}

impl<C: HttpClient> FileLogUploader<C> {
    /// Creates an uploader for `paths`.
    pub fn new(client: C, paths: Vec<PathBuf>) -> Self {
        Self {
            client,
            paths,
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl<C: HttpClient> LogUploader for FileLogUploader<C> {
    fn upload_logs(&self, url: &str) -> SyncResult<()> {
        let mut uploaded = 0usize;
        for path in &self.paths {
            let body = match std::fs::read(path) {
                Ok(body) => body,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SyncError::transport_fatal(format!(
                        "reading {}: {e}",
                        path.display()
                    )))
                }
            };

            let response = self.client.post(url, body, self.timeout).map_err(|e| match e {
                HttpError::Timeout => SyncError::Timeout,
                HttpError::Connection(message) => SyncError::transport_retryable(message),
            })?;
            if !response.is_success() {
                return Err(SyncError::from_status(
                    response.status,
                    String::from_utf8_lossy(&response.body).trim().to_string(),
                ));
            }
            uploaded += 1;
        }
        tracing::debug!(uploaded, "logs uploaded");
        Ok(())
    }
}
