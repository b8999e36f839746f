//! Status command implementation.

use super::format_age;
use crate::error::CliError;
use crate::Format;
use santa_sync_store::{LocalStore, RuleStore, SessionOutcome, StateStore};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sync status of a state directory.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// State directory.
    pub path: String,
    /// Mode from the last server config.
    pub client_mode: String,
    /// Events waiting for upload.
    pub pending_events: usize,
    /// Local binary rules.
    pub binary_rules: u64,
    /// Local certificate rules.
    pub certificate_rules: u64,
    /// Saved rule cursor; empty means start.
    pub cursor: String,
    /// End of the last successful session, seconds since the Unix epoch.
    pub last_successful_sync: Option<u64>,
    /// End of the last session, whatever its outcome.
    pub last_session_at: Option<u64>,
    /// How the last session ended.
    pub last_outcome: Option<SessionOutcome>,
    /// Error that aborted the last session.
    pub last_error: Option<String>,
    /// A clean sync is owed.
    pub clean_sync_requested: bool,
    /// Push notifications are configured.
    pub push_enabled: bool,
    /// Why sync is halted, if it is.
    pub halted: Option<String>,
}

impl StatusReport {
    /// Gathers the report from an opened store.
    pub fn collect(store: &LocalStore) -> Result<Self, CliError> {
        let state = store.state().load()?;
        let counts = store.rules().counts();
        let clean_sync_requested = state.clean_sync_due();
        let config = state.config.unwrap_or_default();
        Ok(Self {
            path: store.path().display().to_string(),
            client_mode: config.client_mode.as_str().to_string(),
            pending_events: store.events().pending_count(),
            binary_rules: counts.binary,
            certificate_rules: counts.certificate,
            cursor: state.cursor.as_str().to_string(),
            last_successful_sync: state.last_successful_sync,
            last_session_at: state.last_session_at,
            last_outcome: state.last_outcome,
            last_error: state.last_error.clone(),
            clean_sync_requested,
            push_enabled: config.push_token.is_some(),
            halted: state.halted,
        })
    }

    /// Renders the report for a terminal.
    pub fn to_text(&self, now: u64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "State directory:    {}", self.path);
        let _ = writeln!(out, "Mode:               {}", self.client_mode);
        let _ = writeln!(out, "Pending events:     {}", self.pending_events);
        let _ = writeln!(out, "Binary rules:       {}", self.binary_rules);
        let _ = writeln!(out, "Certificate rules:  {}", self.certificate_rules);
        let cursor = if self.cursor.is_empty() { "<start>" } else { &self.cursor };
        let _ = writeln!(out, "Rule cursor:        {cursor}");
        let last = match self.last_successful_sync {
            Some(then) => format_age(then, now),
            None => "never".to_string(),
        };
        let _ = writeln!(out, "Last sync:          {last}");
        if let (Some(outcome), Some(at)) = (self.last_outcome, self.last_session_at) {
            let _ = writeln!(out, "Last session:       {outcome}, {}", format_age(at, now));
        }
        if let Some(error) = &self.last_error {
            let _ = writeln!(out, "Last error:         {error}");
        }
        let _ = writeln!(out, "Push notifications: {}", if self.push_enabled { "on" } else { "off" });
        if self.clean_sync_requested {
            let _ = writeln!(out, "Clean sync:         requested");
        }
        if let Some(reason) = &self.halted {
            let _ = writeln!(out, "HALTED:             {reason}");
            let _ = writeln!(out, "                    run `santactl sync` to resume");
        }
        out
    }
}

/// Runs the status command.
pub fn run(path: &Path, format: Format) -> Result<(), CliError> {
    let store = LocalStore::open(path)?;
    let report = StatusReport::collect(&store)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print!("{}", report.to_text(unix_now())),
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
