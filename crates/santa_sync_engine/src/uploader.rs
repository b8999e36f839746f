//! Event phase: batched upload of queued events.

use crate::error::SyncError;
use crate::transport::SyncTransport;
use santa_sync_protocol::{EventUploadRequest, SyncConfig};
use santa_sync_store::EventStore;
use std::collections::BTreeSet;

/// How an event phase ended.
#[derive(Debug)]
pub enum UploadResult {
    /// Every event queued at phase start was accepted.
    Complete {
        /// Requests sent.
        batches: usize,
        /// Events acknowledged.
        acknowledged: usize,
    },
    /// The server accepted only part of a batch. The phase stopped there.
    Partial {
        /// Requests sent.
        batches: usize,
        /// Events acknowledged, including earlier full batches.
        acknowledged: usize,
        /// Indices of the last batch the server did not accept.
        rejected: Vec<u64>,
    },
    /// A request or the local store failed. Nothing from the failing batch
    /// was acknowledged.
    Failed {
        /// Requests sent, including the failed one.
        batches: usize,
        /// Events acknowledged by earlier batches.
        acknowledged: usize,
        /// What went wrong.
        error: SyncError,
    },
}

impl UploadResult {
    /// Events acknowledged during the phase.
    pub fn acknowledged(&self) -> usize {
        match self {
            UploadResult::Complete { acknowledged, .. }
            | UploadResult::Partial { acknowledged, .. }
            | UploadResult::Failed { acknowledged, .. } => *acknowledged,
        }
    }

    /// Requests sent during the phase.
    pub fn batches(&self) -> usize {
        match self {
            UploadResult::Complete { batches, .. }
            | UploadResult::Partial { batches, .. }
            | UploadResult::Failed { batches, .. } => *batches,
        }
    }

    /// Returns true if events remain that this phase should have sent.
    pub fn needs_retry(&self) -> bool {
        !matches!(self, UploadResult::Complete { .. })
    }
}

/// Uploads queued events in batches and acknowledges what the server
/// accepts.
///
/// Only events already queued when [`upload`](Self::upload) starts are sent
/// in that call, so a monitor appending quickly cannot keep a session
/// running forever. Later events wait for the next session.
pub struct BatchUploader<'a, T: SyncTransport + ?Sized> {
    transport: &'a T,
    events: &'a EventStore,
}

impl<'a, T: SyncTransport + ?Sized> BatchUploader<'a, T> {
    /// Creates an uploader over `events`.
    pub fn new(transport: &'a T, events: &'a EventStore) -> Self {
        Self { transport, events }
    }

    /// Runs the event phase with the batch size from `config`.
    pub fn upload(&self, config: &SyncConfig) -> UploadResult {
        let batch_size = config.batch_size() as usize;
        let high_water = self.events.next_index().saturating_sub(1);
        let mut batches = 0usize;
        let mut acknowledged = 0usize;

        loop {
            let mut batch = match self.events.pending_envelopes(batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    return UploadResult::Failed {
                        batches,
                        acknowledged,
                        error: e.into(),
                    }
                }
            };
            batch.retain(|e| e.index() <= high_water);
            if batch.is_empty() {
                tracing::debug!(batches, acknowledged, "event upload complete");
                return UploadResult::Complete {
                    batches,
                    acknowledged,
                };
            }

            let request = EventUploadRequest::new(batch);
            let sent = request.indices();
            batches += 1;
            tracing::debug!(batch = batches, events = sent.len(), first = sent[0], "uploading events");

            let response = match self.transport.upload_events(&request) {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(%error, batch = batches, "event upload failed");
                    return UploadResult::Failed {
                        batches,
                        acknowledged,
                        error,
                    };
                }
            };

            let Some(accepted) = response.accepted_indices else {
                match self.events.acknowledge(&sent) {
                    Ok(n) => acknowledged += n,
                    Err(e) => {
                        return UploadResult::Failed {
                            batches,
                            acknowledged,
                            error: e.into(),
                        }
                    }
                }
                continue;
            };

            let sent_set: BTreeSet<u64> = sent.iter().copied().collect();
            let accepted: BTreeSet<u64> = accepted.into_iter().collect();
            let unknown = accepted.difference(&sent_set).count();
            if unknown > 0 {
                tracing::warn!(unknown, "server accepted indices that were not in the batch");
            }
            let to_ack: Vec<u64> = accepted.intersection(&sent_set).copied().collect();

            match self.events.acknowledge(&to_ack) {
                Ok(n) => acknowledged += n,
                Err(e) => {
                    return UploadResult::Failed {
                        batches,
                        acknowledged,
                        error: e.into(),
                    }
                }
            }

            if to_ack.len() < sent_set.len() {
                let rejected: Vec<u64> = sent_set.difference(&accepted).copied().collect();
                tracing::warn!(
                    accepted = to_ack.len(),
                    rejected = rejected.len(),
                    "server accepted part of an event batch"
                );
                return UploadResult::Partial {
                    batches,
                    acknowledged,
                    rejected,
                };
            }
        }
    }
}
