//! Request and response bodies for the sync endpoints.

use crate::config::ClientMode;
use crate::cursor::SyncCursor;
use crate::envelope::PendingEventEnvelope;
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::EventRecord;
use crate::rule::RuleRecord;
use serde::{Deserialize, Serialize};

/// Identity of the machine, sent with every config request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    /// Hardware serial number; also the path component of every endpoint.
    #[serde(rename = "serial_num")]
    pub serial: String,
    /// Host name.
    pub hostname: String,
    /// Client version.
    pub santa_version: String,
    /// OS version.
    pub os_version: String,
    /// OS build.
    pub os_build: String,
    /// Primary user of the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_user: Option<String>,
}

/// Body of the config (preflight) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRequest {
    /// Machine identity.
    #[serde(flatten)]
    pub machine: MachineInfo,
    /// Mode currently enforced.
    pub client_mode: ClientMode,
    /// Binary rules held locally.
    pub binary_rule_count: u64,
    /// Certificate rules held locally.
    pub certificate_rule_count: u64,
    /// Operator asked for a clean sync.
    #[serde(default)]
    pub request_clean_sync: bool,
}

impl ConfigRequest {
    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of a rule download request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDownloadRequest {
    /// Where to resume; omitted at the start of the stream.
    #[serde(default, skip_serializing_if = "SyncCursor::is_start")]
    pub cursor: SyncCursor,
}

impl RuleDownloadRequest {
    /// Creates a request resuming at `cursor`.
    pub fn new(cursor: SyncCursor) -> Self {
        Self { cursor }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One page of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDownloadResponse {
    /// Rules in server order.
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
    /// Cursor for the next page; absent or empty on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<SyncCursor>,
}

impl RuleDownloadResponse {
    /// Creates a page followed by more pages.
    pub fn page(rules: Vec<RuleRecord>, next: impl Into<SyncCursor>) -> Self {
        Self {
            rules,
            cursor: Some(next.into()),
        }
    }

    /// Creates the final page.
    pub fn last(rules: Vec<RuleRecord>) -> Self {
        Self {
            rules,
            cursor: None,
        }
    }

    /// Cursor of the following page, or `None` at the end of the stream.
    pub fn next_cursor(&self) -> Option<&SyncCursor> {
        self.cursor.as_ref().filter(|c| !c.is_start())
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON and validates every rule.
    ///
    /// A single bad rule rejects the whole page so the page is never
    /// partially applied.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let page: Self = serde_json::from_slice(bytes)?;
        for rule in &page.rules {
            rule.validate()?;
        }
        Ok(page)
    }
}

/// A batch of pending events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventUploadRequest {
    /// Envelopes in store order.
    pub events: Vec<PendingEventEnvelope>,
}

impl EventUploadRequest {
    /// Creates a request for `events`.
    pub fn new(events: Vec<PendingEventEnvelope>) -> Self {
        Self { events }
    }

    /// Indices carried by this batch, in order.
    pub fn indices(&self) -> Vec<u64> {
        self.events.iter().map(PendingEventEnvelope::index).collect()
    }

    /// Builds `{"events":[...]}` from the envelope bytes without
    /// re-serializing the events.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let body_len: usize = self.events.iter().map(|e| e.json().len() + 1).sum();
        let mut out = Vec::with_capacity(body_len + 16);
        out.extend_from_slice(b"{\"events\":[");
        for (i, envelope) in self.events.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(envelope.json());
        }
        out.extend_from_slice(b"]}");
        Ok(out)
    }

    /// Decodes the events of an upload body.
    pub fn decode_events(bytes: &[u8]) -> ProtocolResult<Vec<EventRecord>> {
        #[derive(Deserialize)]
        struct Body {
            events: Vec<EventRecord>,
        }
        let body: Body = serde_json::from_slice(bytes)?;
        Ok(body.events)
    }
}

/// Response to an event upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUploadResponse {
    /// Indices the server stored. `None` means the whole batch was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_indices: Option<Vec<u64>>,
}

impl EventUploadResponse {
    /// Every event in the batch was accepted.
    pub fn all_accepted() -> Self {
        Self::default()
    }

    /// Only `indices` were accepted.
    pub fn partial(indices: Vec<u64>) -> Self {
        Self {
            accepted_indices: Some(indices),
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON. An empty body counts as full acceptance.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::all_accepted());
        }
        let response: Self = serde_json::from_slice(bytes)?;
        if let Some(indices) = &response.accepted_indices {
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != indices.len() {
                return Err(ProtocolError::Invalid(
                    "duplicate index in accepted_indices".into(),
                ));
            }
        }
        Ok(response)
    }
}
