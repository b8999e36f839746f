//! Server-delivered policy snapshot.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Events per upload request when the server does not say otherwise.
pub const DEFAULT_EVENT_BATCH_SIZE: u32 = 50;

/// Seconds between periodic full syncs.
pub const DEFAULT_FULL_SYNC_INTERVAL_SECS: u64 = 600;

/// Seconds between periodic full syncs while push notifications are active.
pub const DEFAULT_PUSH_FULL_SYNC_INTERVAL_SECS: u64 = 14_400;

/// Upper bound, in seconds, on the random delay before a global rule sync.
pub const DEFAULT_PUSH_GLOBAL_RULE_SYNC_DEADLINE_SECS: u64 = 600;

/// Seconds to wait after a failed session when the server sent no backoff.
pub const DEFAULT_BACKOFF_INTERVAL_SECS: u64 = 300;

/// Shortest sync or backoff interval accepted from the server.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 10;

/// Longest interval or delay accepted from the server.
pub const MAX_SYNC_INTERVAL_SECS: u64 = 86_400;

/// Clamps a server-sent interval into the accepted range.
pub fn bounded_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_SYNC_INTERVAL_SECS, MAX_SYNC_INTERVAL_SECS))
}

/// Enforcement mode pushed by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClientMode {
    /// Unknown binaries are allowed and logged.
    #[default]
    Monitor,
    /// Unknown binaries are blocked.
    Lockdown,
}

impl ClientMode {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientMode::Monitor => "MONITOR",
            ClientMode::Lockdown => "LOCKDOWN",
        }
    }
}

impl FromStr for ClientMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "MONITOR" => Ok(ClientMode::Monitor),
            "LOCKDOWN" => Ok(ClientMode::Lockdown),
            other => Err(ProtocolError::unknown("client_mode", other)),
        }
    }
}

impl TryFrom<String> for ClientMode {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        value.parse()
    }
}

impl From<ClientMode> for String {
    fn from(value: ClientMode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ClientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy snapshot returned by the config endpoint.
///
/// Optional fields fall back to the `DEFAULT_*` constants through the
/// accessor methods; the raw options are kept so the persisted snapshot
/// reflects exactly what the server sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Enforcement mode.
    #[serde(default)]
    pub client_mode: ClientMode,
    /// Events per upload request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    /// Server asks for a full rule re-download.
    #[serde(default)]
    pub clean_sync: bool,
    /// Path regex whose matches are always allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist_regex: Option<String>,
    /// Path regex whose matches are always blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist_regex: Option<String>,
    /// Number of binary rules the server holds for this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_rule_count: Option<u64>,
    /// Number of certificate rules the server holds for this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_rule_count: Option<u64>,
    /// Push notification registration token.
    #[serde(rename = "fcm_token", default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    /// Seconds between periodic full syncs.
    #[serde(
        rename = "full_sync_interval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub full_sync_interval_secs: Option<u64>,
    /// Seconds between full syncs while push is active.
    #[serde(
        rename = "fcm_full_sync_interval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub push_full_sync_interval_secs: Option<u64>,
    /// Upper bound on the delay before a push-triggered global rule sync.
    #[serde(
        rename = "fcm_global_rule_sync_deadline",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub push_global_rule_sync_deadline_secs: Option<u64>,
    /// Bundle hashing enabled.
    #[serde(default)]
    pub bundles_enabled: bool,
    /// Seconds to back off after a failed session.
    #[serde(rename = "backoff", default, skip_serializing_if = "Option::is_none")]
    pub backoff_interval_secs: Option<u64>,
    /// Where the log phase uploads diagnostics, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_logs_url: Option<String>,
}

impl SyncConfig {
    /// Events per upload request.
    pub fn batch_size(&self) -> u32 {
        match self.batch_size {
            Some(size) if size > 0 => size,
            _ => DEFAULT_EVENT_BATCH_SIZE,
        }
    }

    /// Interval between periodic full syncs, honoring push mode. Bounded by
    /// [`MIN_SYNC_INTERVAL_SECS`] and [`MAX_SYNC_INTERVAL_SECS`].
    pub fn full_sync_interval(&self) -> Duration {
        let secs = if self.push_token.is_some() {
            self.push_full_sync_interval_secs
                .unwrap_or(DEFAULT_PUSH_FULL_SYNC_INTERVAL_SECS)
        } else {
            self.full_sync_interval_secs
                .unwrap_or(DEFAULT_FULL_SYNC_INTERVAL_SECS)
        };
        bounded_interval(secs)
    }

    /// Upper bound on the delay before a push-triggered global rule sync.
    /// Zero is allowed and means no delay.
    pub fn push_global_rule_sync_deadline(&self) -> Duration {
        let secs = self
            .push_global_rule_sync_deadline_secs
            .unwrap_or(DEFAULT_PUSH_GLOBAL_RULE_SYNC_DEADLINE_SECS);
        Duration::from_secs(secs.min(MAX_SYNC_INTERVAL_SECS))
    }

    /// Server-requested backoff, if any, bounded like the sync interval.
    pub fn backoff_interval(&self) -> Option<Duration> {
        self.backoff_interval_secs.map(bounded_interval)
    }

    /// Decodes the config endpoint response.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the snapshot as JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
