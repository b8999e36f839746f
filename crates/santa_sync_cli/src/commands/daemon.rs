//! Daemon command implementation.
//!
//! Runs the scheduler on a tokio runtime until SIGINT. On Unix, SIGHUP
//! requests an immediate full sync and SIGUSR1 a clean one.

use super::Setup;
use crate::error::CliError;
use crate::http::ReqwestClient;
use santa_sync_engine::{FileLogUploader, Scheduler, SchedulerHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the sync daemon in the foreground.
pub fn run(setup: Setup, log_files: Vec<PathBuf>) -> Result<(), CliError> {
    let Setup {
        store: _store,
        orchestrator,
    } = setup;

    // The blocking HTTP client must be built outside the runtime.
    let orchestrator = if log_files.is_empty() {
        Arc::new(orchestrator)
    } else {
        let uploader = FileLogUploader::new(ReqwestClient::new()?, log_files);
        Arc::new(orchestrator.with_log_uploader(Arc::new(uploader)))
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (scheduler, handle) = Scheduler::new(Arc::clone(&orchestrator));
        let task = tokio::spawn(scheduler.run());
        info!(server = %orchestrator.client_config().server_url, "sync daemon started");

        let result = wait_for_signals(&handle).await;
        handle.shutdown();
        if let Err(e) = task.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
        info!("sync daemon stopped");
        result
    })?;

    // Dropped here, outside the runtime.
    drop(orchestrator);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signals(handle: &SchedulerHandle) -> Result<(), CliError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("interrupt received");
                return Ok(());
            }
            Some(()) = hangup.recv() => {
                info!("SIGHUP received; syncing now");
                handle.sync_now().await?;
            }
            Some(()) = user1.recv() => {
                info!("SIGUSR1 received; clean sync requested");
                handle.clean_sync().await?;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_handle: &SchedulerHandle) -> Result<(), CliError> {
    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    Ok(())
}
