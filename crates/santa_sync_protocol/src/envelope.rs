//! Pre-serialized pending events.

use crate::error::ProtocolResult;
use crate::event::EventRecord;
use std::sync::Arc;

/// An event index paired with the JSON bytes captured when the event was
/// read from the store.
///
/// The upload path only ever sees envelopes, so a bundle-metadata update
/// landing on the stored record after the read cannot change what a batch
/// contains. Envelopes are immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEventEnvelope {
    index: u64,
    json: Arc<[u8]>,
}

impl PendingEventEnvelope {
    /// Pairs `index` with already-encoded JSON.
    pub fn new(index: u64, json: impl Into<Arc<[u8]>>) -> Self {
        Self {
            index,
            json: json.into(),
        }
    }

    /// Serializes `event` now and wraps the result.
    pub fn from_event(event: &EventRecord) -> ProtocolResult<Self> {
        Ok(Self::new(event.index, event.encode()?))
    }

    /// Store index of the event.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Encoded event JSON.
    pub fn json(&self) -> &[u8] {
        &self.json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BundleMetadata, Decision};

    #[test]
    fn envelope_is_a_snapshot() {
        let mut event = EventRecord::new("h", "/bin/ls", Decision::AllowBinary, 1.0);
        event.index = 3;
        let envelope = PendingEventEnvelope::from_event(&event).unwrap();

        event.apply_bundle_metadata(BundleMetadata {
            hash: Some("later".into()),
            ..BundleMetadata::default()
        });

        assert_eq!(envelope.index(), 3);
        let decoded = EventRecord::decode(envelope.json()).unwrap();
        assert!(decoded.bundle.hash.is_none());
    }
}
