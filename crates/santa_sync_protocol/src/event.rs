//! Execution event records.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Outcome of an execution-authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Decision {
    /// Allowed by a binary rule.
    AllowBinary,
    /// Allowed by a certificate rule.
    AllowCertificate,
    /// Allowed by a path scope (whitelist regex).
    AllowScope,
    /// Allowed because no rule matched in monitor mode.
    AllowUnknown,
    /// Blocked by a binary rule.
    BlockBinary,
    /// Blocked by a certificate rule.
    BlockCertificate,
    /// Blocked by a path scope (blacklist regex).
    BlockScope,
    /// Blocked because no rule matched in lockdown mode.
    BlockUnknown,
    /// A sibling binary recorded while hashing a bundle.
    BundleBinary,
}

impl Decision {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AllowBinary => "ALLOW_BINARY",
            Decision::AllowCertificate => "ALLOW_CERTIFICATE",
            Decision::AllowScope => "ALLOW_SCOPE",
            Decision::AllowUnknown => "ALLOW_UNKNOWN",
            Decision::BlockBinary => "BLOCK_BINARY",
            Decision::BlockCertificate => "BLOCK_CERTIFICATE",
            Decision::BlockScope => "BLOCK_SCOPE",
            Decision::BlockUnknown => "BLOCK_UNKNOWN",
            Decision::BundleBinary => "BUNDLE_BINARY",
        }
    }

    /// Returns true if execution was denied.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Decision::BlockBinary
                | Decision::BlockCertificate
                | Decision::BlockScope
                | Decision::BlockUnknown
        )
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "ALLOW_BINARY" => Ok(Decision::AllowBinary),
            "ALLOW_CERTIFICATE" => Ok(Decision::AllowCertificate),
            "ALLOW_SCOPE" => Ok(Decision::AllowScope),
            "ALLOW_UNKNOWN" => Ok(Decision::AllowUnknown),
            "BLOCK_BINARY" => Ok(Decision::BlockBinary),
            "BLOCK_CERTIFICATE" => Ok(Decision::BlockCertificate),
            "BLOCK_SCOPE" => Ok(Decision::BlockScope),
            "BLOCK_UNKNOWN" => Ok(Decision::BlockUnknown),
            "BUNDLE_BINARY" => Ok(Decision::BundleBinary),
            other => Err(ProtocolError::unknown("decision", other)),
        }
    }
}

impl TryFrom<String> for Decision {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        value.parse()
    }
}

impl From<Decision> for String {
    fn from(value: Decision) -> Self {
        value.as_str().to_string()
    }
}

/// One certificate of a signing chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningCertificate {
    /// SHA-256 of the DER certificate.
    pub sha256: String,
    /// Common name.
    #[serde(rename = "cn", default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// Organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    /// Organizational unit.
    #[serde(rename = "ou", default, skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<String>,
    /// Start of validity, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<i64>,
    /// End of validity, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
}

/// Bundle information, filled in after the bundle has been hashed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Aggregate hash of every executable in the bundle.
    #[serde(rename = "file_bundle_hash", default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Time spent hashing the bundle, in milliseconds.
    #[serde(
        rename = "file_bundle_hash_millis",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hash_duration_ms: Option<u64>,
    /// Number of executables found in the bundle.
    #[serde(
        rename = "file_bundle_binary_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub binary_count: Option<u64>,
    /// Display name of the bundle.
    #[serde(rename = "file_bundle_name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Path of the bundle.
    #[serde(rename = "file_bundle_path", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Main executable path relative to the bundle.
    #[serde(
        rename = "file_bundle_executable_rel_path",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub executable_rel_path: Option<String>,
    /// Bundle identifier.
    #[serde(rename = "file_bundle_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Bundle version.
    #[serde(rename = "file_bundle_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Short version string.
    #[serde(
        rename = "file_bundle_version_string",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub version_string: Option<String>,
}

/// Quarantine attributes of a downloaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineInfo {
    /// URL the file was downloaded from.
    #[serde(
        rename = "quarantine_data_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub data_url: Option<String>,
    /// Referring page.
    #[serde(
        rename = "quarantine_referer_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub referer_url: Option<String>,
    /// Download time, seconds since the Unix epoch.
    #[serde(
        rename = "quarantine_timestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    /// Bundle ID of the downloading agent.
    #[serde(
        rename = "quarantine_agent_bundle_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_bundle_id: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One recorded execution decision.
///
/// `index` is assigned by the event store on append and is the only key used
/// to acknowledge the event after upload. Records built by the monitor carry
/// `index == 0` until they are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Store-assigned identifier.
    #[serde(rename = "idx", default)]
    pub index: u64,
    /// SHA-256 of the executed file.
    pub file_sha256: String,
    /// Full path of the executed file.
    pub file_path: String,
    /// Decision the monitor returned.
    pub decision: Decision,
    /// When the execution was requested, seconds since the Unix epoch.
    #[serde(rename = "execution_time")]
    pub occurrence_time: f64,
    /// User that executed the binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executing_user: Option<String>,
    /// Process ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Parent process ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<i32>,
    /// Parent process name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Signing chain, leaf first. Order is preserved exactly as recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_chain: Vec<SigningCertificate>,
    /// Users logged in when the decision was made.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub logged_in_users: BTreeSet<String>,
    /// Sessions active when the decision was made (`user@console`, ...).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub current_sessions: BTreeSet<String>,
    /// Set when bundle hashing is still outstanding.
    #[serde(default, skip_serializing_if = "is_false")]
    pub needs_bundle_hash: bool,
    /// Bundle attributes.
    #[serde(flatten)]
    pub bundle: BundleMetadata,
    /// Quarantine attributes.
    #[serde(flatten)]
    pub quarantine: QuarantineInfo,
}

impl EventRecord {
    /// Creates a record with the required fields; everything else is empty.
    pub fn new(
        file_sha256: impl Into<String>,
        file_path: impl Into<String>,
        decision: Decision,
        occurrence_time: f64,
    ) -> Self {
        Self {
            index: 0,
            file_sha256: file_sha256.into(),
            file_path: file_path.into(),
            decision,
            occurrence_time,
            executing_user: None,
            pid: None,
            ppid: None,
            parent_name: None,
            signing_chain: Vec::new(),
            logged_in_users: BTreeSet::new(),
            current_sessions: BTreeSet::new(),
            needs_bundle_hash: false,
            bundle: BundleMetadata::default(),
            quarantine: QuarantineInfo::default(),
        }
    }

    /// Sets the executing user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.executing_user = Some(user.into());
        self
    }

    /// Sets process and parent process information.
    pub fn with_process(mut self, pid: i32, ppid: i32, parent_name: impl Into<String>) -> Self {
        self.pid = Some(pid);
        self.ppid = Some(ppid);
        self.parent_name = Some(parent_name.into());
        self
    }

    /// Sets the signing chain.
    pub fn with_signing_chain(mut self, chain: Vec<SigningCertificate>) -> Self {
        self.signing_chain = chain;
        self
    }

    /// Marks the record as waiting for a bundle hash.
    pub fn needing_bundle_hash(mut self) -> Self {
        self.needs_bundle_hash = true;
        self
    }

    /// Replaces the bundle attributes and clears `needs_bundle_hash`.
    pub fn apply_bundle_metadata(&mut self, metadata: BundleMetadata) {
        self.bundle = metadata;
        self.needs_bundle_hash = false;
    }

    /// Encodes the record as JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a record from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventRecord {
        EventRecord::new("ab12", "/usr/bin/ssh", Decision::BlockBinary, 1_700_000_000.5)
            .with_user("alice")
            .with_process(412, 1, "launchd")
            .with_signing_chain(vec![
                SigningCertificate {
                    sha256: "leaf".into(),
                    common_name: Some("Developer ID".into()),
                    org: None,
                    org_unit: None,
                    valid_from: Some(1),
                    valid_until: Some(2),
                },
                SigningCertificate {
                    sha256: "root".into(),
                    common_name: Some("Root CA".into()),
                    org: None,
                    org_unit: None,
                    valid_from: None,
                    valid_until: None,
                },
            ])
    }

    #[test]
    fn decision_wire_names() {
        assert_eq!(Decision::AllowUnknown.as_str(), "ALLOW_UNKNOWN");
        assert_eq!(
            "SILENT".parse::<Decision>().unwrap_err().to_string(),
            "unknown decision value: \"SILENT\""
        );
        assert!(Decision::BlockScope.is_block());
        assert!(!Decision::BundleBinary.is_block());
    }

    #[test]
    fn wire_keys_match_server_names() {
        let mut event = sample();
        event.index = 7;
        event.bundle.hash = Some("bundlehash".into());
        event.quarantine.data_url = Some("https://example.com/x.dmg".into());

        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(json["idx"], 7);
        assert_eq!(json["file_sha256"], "ab12");
        assert_eq!(json["decision"], "BLOCK_BINARY");
        assert_eq!(json["execution_time"], 1_700_000_000.5);
        assert_eq!(json["signing_chain"][0]["cn"], "Developer ID");
        assert_eq!(json["file_bundle_hash"], "bundlehash");
        assert_eq!(json["quarantine_data_url"], "https://example.com/x.dmg");
        assert!(json.get("needs_bundle_hash").is_none());
    }

    #[test]
    fn signing_chain_order_and_duplicates_preserved() {
        let mut event = sample();
        let leaf = event.signing_chain[0].clone();
        event.signing_chain.push(leaf);

        let decoded = EventRecord::decode(&event.encode().unwrap()).unwrap();
        let hashes: Vec<_> = decoded.signing_chain.iter().map(|c| c.sha256.as_str()).collect();
        assert_eq!(hashes, ["leaf", "root", "leaf"]);
    }

    #[test]
    fn unknown_decision_is_rejected() {
        let json = br#"{"file_sha256":"a","file_path":"/a","decision":"MAYBE","execution_time":1.0}"#;
        assert!(EventRecord::decode(json).is_err());
    }

    #[test]
    fn bundle_metadata_clears_pending_flag() {
        let mut event = sample().needing_bundle_hash();
        event.apply_bundle_metadata(BundleMetadata {
            hash: Some("h".into()),
            binary_count: Some(3),
            ..BundleMetadata::default()
        });
        assert!(!event.needs_bundle_hash);
        assert_eq!(event.bundle.binary_count, Some(3));
    }
}
