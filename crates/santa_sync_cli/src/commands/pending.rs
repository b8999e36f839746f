//! Pending command implementation.

use crate::error::CliError;
use crate::Format;
use santa_sync_protocol::EventRecord;
use santa_sync_store::LocalStore;
use std::fmt::Write as _;
use std::path::Path;

/// Runs the pending command.
pub fn run(path: &Path, limit: usize, format: Format) -> Result<(), CliError> {
    let store = LocalStore::open(path)?;
    let events = store.events();
    let envelopes = events.pending_envelopes(limit)?;

    match format {
        Format::Json => {
            let values = envelopes
                .iter()
                .map(|e| serde_json::from_slice::<serde_json::Value>(e.json()))
                .collect::<Result<Vec<_>, _>>()?;
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        Format::Text => {
            let records = envelopes
                .iter()
                .map(|e| EventRecord::decode(e.json()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(santa_sync_store::StoreError::from)?;
            print!("{}", render(&records, events.pending_count()));
        }
    }
    Ok(())
}

/// Table of queued events, oldest first.
pub fn render(events: &[EventRecord], total: usize) -> String {
    let mut out = String::new();
    if events.is_empty() {
        out.push_str("No events pending upload\n");
        return out;
    }
    let _ = writeln!(out, "{:>8}  {:<18}  {:<16}  PATH", "INDEX", "DECISION", "SHA256");
    for event in events {
        let hash: String = event.file_sha256.chars().take(16).collect();
        let _ = writeln!(
            out,
            "{:>8}  {:<18}  {:<16}  {}",
            event.index,
            event.decision.as_str(),
            hash,
            event.file_path
        );
    }
    if total > events.len() {
        let _ = writeln!(out, "... and {} more", total - events.len());
    }
    out
}
