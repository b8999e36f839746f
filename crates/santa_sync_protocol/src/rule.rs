//! Rule records delivered by the server.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a rule's hash identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleType {
    /// SHA-256 of a binary.
    Binary,
    /// SHA-256 of a signing certificate.
    Certificate,
}

impl RuleType {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Binary => "BINARY",
            RuleType::Certificate => "CERTIFICATE",
        }
    }
}

impl FromStr for RuleType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "BINARY" => Ok(RuleType::Binary),
            "CERTIFICATE" => Ok(RuleType::Certificate),
            other => Err(ProtocolError::unknown("rule_type", other)),
        }
    }
}

impl TryFrom<String> for RuleType {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        value.parse()
    }
}

impl From<RuleType> for String {
    fn from(value: RuleType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RulePolicy {
    /// Allow execution.
    Whitelist,
    /// Block execution and notify the user.
    Blacklist,
    /// Block execution without a user-visible alert.
    SilentBlacklist,
    /// Delete the existing rule for this key.
    Remove,
}

impl RulePolicy {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RulePolicy::Whitelist => "WHITELIST",
            RulePolicy::Blacklist => "BLACKLIST",
            RulePolicy::SilentBlacklist => "SILENT_BLACKLIST",
            RulePolicy::Remove => "REMOVE",
        }
    }
}

impl FromStr for RulePolicy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "WHITELIST" => Ok(RulePolicy::Whitelist),
            "BLACKLIST" => Ok(RulePolicy::Blacklist),
            "SILENT_BLACKLIST" => Ok(RulePolicy::SilentBlacklist),
            "REMOVE" => Ok(RulePolicy::Remove),
            other => Err(ProtocolError::unknown("policy", other)),
        }
    }
}

impl TryFrom<String> for RulePolicy {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        value.parse()
    }
}

impl From<RulePolicy> for String {
    fn from(value: RulePolicy) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RulePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a rule in the local rule table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    /// Binary or certificate hash.
    pub hash: String,
    /// Kind of hash.
    pub rule_type: RuleType,
}

impl RuleKey {
    /// Creates a key.
    pub fn new(hash: impl Into<String>, rule_type: RuleType) -> Self {
        Self {
            hash: hash.into(),
            rule_type,
        }
    }
}

/// A single rule in a downloaded page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Binary or certificate SHA-256.
    #[serde(rename = "sha256")]
    pub hash: String,
    /// Kind of hash.
    pub rule_type: RuleType,
    /// Policy to apply.
    pub policy: RulePolicy,
    /// Message shown to the user when the rule blocks.
    #[serde(rename = "custom_msg", default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

impl RuleRecord {
    /// Creates a rule without a custom message.
    pub fn new(hash: impl Into<String>, rule_type: RuleType, policy: RulePolicy) -> Self {
        Self {
            hash: hash.into(),
            rule_type,
            policy,
            custom_message: None,
        }
    }

    /// Attaches a custom block message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.custom_message = Some(message.into());
        self
    }

    /// Key this rule is stored under.
    pub fn key(&self) -> RuleKey {
        RuleKey::new(self.hash.clone(), self.rule_type)
    }

    /// Checks fields the type system cannot.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.hash.trim().is_empty() {
            return Err(ProtocolError::Invalid("rule with empty sha256".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_rule() {
        let json = r#"{"sha256":"abc","rule_type":"CERTIFICATE","policy":"SILENT_BLACKLIST","custom_msg":"no"}"#;
        let rule: RuleRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rule.rule_type, RuleType::Certificate);
        assert_eq!(rule.policy, RulePolicy::SilentBlacklist);
        assert_eq!(rule.custom_message.as_deref(), Some("no"));
        assert_eq!(rule.key(), RuleKey::new("abc", RuleType::Certificate));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let json = r#"{"sha256":"abc","rule_type":"BINARY","policy":"GRAYLIST"}"#;
        let err = serde_json::from_str::<RuleRecord>(json).unwrap_err();
        assert!(err.to_string().contains("GRAYLIST"));
    }

    #[test]
    fn unknown_rule_type_is_rejected() {
        assert!(matches!(
            "TEAMID".parse::<RuleType>(),
            Err(ProtocolError::UnknownValue { field: "rule_type", .. })
        ));
    }

    #[test]
    fn empty_hash_fails_validation() {
        let rule = RuleRecord::new(" ", RuleType::Binary, RulePolicy::Whitelist);
        assert!(rule.validate().is_err());
    }
}
