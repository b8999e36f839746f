//! Sync command implementation.

use super::Setup;
use crate::error::CliError;
use santa_sync_engine::{SessionKind, SessionOutcome, SessionReport, UploadResult};
use std::fmt::Write as _;

/// Runs one full session in the foreground.
///
/// An operator running this also lifts a halt left by a permanent server
/// rejection.
pub fn run(setup: &Setup, clean: bool) -> Result<(), CliError> {
    let orchestrator = &setup.orchestrator;
    if orchestrator.clear_halt()? {
        println!("Sync halt cleared");
    }
    if clean {
        orchestrator.request_clean_sync()?;
    }

    let report = orchestrator.run_session(SessionKind::Full)?;
    print!("{}", summarize(&report));
    Ok(())
}

/// One paragraph describing a finished session.
pub fn summarize(report: &SessionReport) -> String {
    let mut out = String::new();
    let outcome = match report.outcome {
        SessionOutcome::Success => "complete",
        SessionOutcome::Partial => "partially complete",
        SessionOutcome::Failure => "failed",
    };
    let _ = writeln!(out, "Sync {outcome} in {} ms", report.duration.as_millis());
    let _ = writeln!(out, "  Mode:    {}", report.config.client_mode);
    let kind = if report.rules.clean { "clean" } else { "incremental" };
    let _ = writeln!(
        out,
        "  Rules:   {} page(s), {} added or updated, {} removed ({kind})",
        report.rules.pages, report.rules.upserted, report.rules.removed
    );
    match &report.upload {
        Some(UploadResult::Partial { acknowledged, rejected, .. }) => {
            let _ = writeln!(
                out,
                "  Events:  {acknowledged} uploaded, {} not accepted and queued for retry",
                rejected.len()
            );
        }
        Some(upload) => {
            let _ = writeln!(out, "  Events:  {} uploaded", upload.acknowledged());
        }
        None => {}
    }
    match report.logs_uploaded {
        Some(true) => {
            let _ = writeln!(out, "  Logs:    uploaded");
        }
        Some(false) => {
            let _ = writeln!(out, "  Logs:    upload failed");
        }
        None => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use santa_sync_engine::RuleSyncResult;
    use santa_sync_protocol::SyncConfig;
    use std::time::Duration;

    fn report(upload: Option<UploadResult>, outcome: SessionOutcome) -> SessionReport {
        SessionReport {
            kind: SessionKind::Full,
            outcome,
            config: SyncConfig::default(),
            rules: RuleSyncResult {
                pages: 2,
                upserted: 5,
                removed: 1,
                ..RuleSyncResult::default()
            },
            upload,
            logs_uploaded: None,
            duration: Duration::from_millis(42),
        }
    }

    #[test]
    fn summarizes_complete_session() {
        let text = summarize(&report(
            Some(UploadResult::Complete {
                batches: 1,
                acknowledged: 3,
            }),
            SessionOutcome::Success,
        ));
        assert!(text.starts_with("Sync complete in 42 ms"));
        assert!(text.contains("2 page(s), 5 added or updated, 1 removed (incremental)"));
        assert!(text.contains("Events:  3 uploaded"));
        assert!(!text.contains("Logs"));
    }

    #[test]
    fn summarizes_partial_upload() {
        let text = summarize(&report(
            Some(UploadResult::Partial {
                batches: 1,
                acknowledged: 1,
                rejected: vec![2, 3],
            }),
            SessionOutcome::Partial,
        ));
        assert!(text.starts_with("Sync partially complete"));
        assert!(text.contains("1 uploaded, 2 not accepted"));
    }
}
