//! Trigger handling for the sync daemon.
//!
//! The [`Scheduler`] owns the timing: a periodic full sync, push-driven
//! syncs, operator requests and backoff after failures. Sessions themselves
//! are blocking and run on tokio's blocking pool.

use crate::backoff::Backoff;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{SessionKind, SessionReport, SyncOrchestrator};
use crate::transport::SyncTransport;
use rand::Rng;
use santa_sync_protocol::MAX_SYNC_INTERVAL_SECS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

const COMMAND_QUEUE: usize = 32;

/// Push notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMessage {
    /// Something changed for this machine; sync fully now.
    Targeted,
    /// Rules changed for every machine; sync rules after a random delay so
    /// the fleet does not hit the server at once.
    GlobalRuleSync,
}

/// Requests sent to a running [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Full sync as soon as possible.
    SyncNow,
    /// Mark a clean sync as owed, then full sync as soon as possible.
    CleanSync,
    /// A push notification arrived.
    Push(PushMessage),
}

/// Control side of a [`Scheduler`]. Dropping every handle stops the
/// scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SyncCommand>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    /// Sends a command.
    ///
    /// # Errors
    ///
    /// [`SyncError::Cancelled`] if the scheduler has stopped.
    pub async fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::Cancelled)
    }

    /// Requests a full sync.
    pub async fn sync_now(&self) -> SyncResult<()> {
        self.send(SyncCommand::SyncNow).await
    }

    /// Requests a clean sync.
    pub async fn clean_sync(&self) -> SyncResult<()> {
        self.send(SyncCommand::CleanSync).await
    }

    /// Delivers a push notification.
    pub async fn push(&self, message: PushMessage) -> SyncResult<()> {
        self.send(SyncCommand::Push(message)).await
    }

    /// Stops the scheduler. A running session is cancelled at its next phase
    /// boundary.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Decides when sessions run.
///
/// - A full sync runs at startup and then every
///   [`full_sync_interval`](santa_sync_protocol::SyncConfig::full_sync_interval)
/// - After a failure the next attempt waits for the backoff delay
/// - After a partial upload the next attempt waits for the base backoff
///   interval, without growth
/// - Triggers that arrive during a session collapse into one follow-up
///   session
pub struct Scheduler<T: SyncTransport + 'static> {
    orchestrator: Arc<SyncOrchestrator<T>>,
    commands: mpsc::Receiver<SyncCommand>,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
    next_full: Instant,
    rule_sync_at: Option<Instant>,
    stopping: bool,
}

impl<T: SyncTransport + 'static> Scheduler<T> {
    /// Creates a scheduler and its handle.
    pub fn new(orchestrator: Arc<SyncOrchestrator<T>>) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backoff = Backoff::new(orchestrator.client_config().backoff_policy);
        let scheduler = Self {
            orchestrator,
            commands: command_rx,
            shutdown: shutdown_rx,
            backoff,
            next_full: Instant::now(),
            rule_sync_at: None,
            stopping: false,
        };
        let handle = SchedulerHandle {
            commands: command_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (scheduler, handle)
    }

    /// Runs until shut down.
    #[tracing::instrument(skip(self))]
    pub async fn run(mut self) {
        tracing::info!("sync scheduler running");

        while !self.stopping {
            let rule_sync_at = self.rule_sync_at;
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        self.stopping = true;
                    }
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.stopping = true,
                },

                _ = tokio::time::sleep_until(self.next_full) => {
                    self.run_session(SessionKind::Full).await;
                }

                _ = sleep_until_some(rule_sync_at) => {
                    self.rule_sync_at = None;
                    self.run_session(SessionKind::RuleOnly).await;
                }
            }
        }

        tracing::info!("sync scheduler stopped");
    }

    async fn handle_command(&mut self, command: SyncCommand) {
        tracing::debug!(?command, "sync trigger");
        match command {
            SyncCommand::SyncNow | SyncCommand::Push(PushMessage::Targeted) => {
                self.next_full = Instant::now();
            }
            SyncCommand::CleanSync => {
                let orchestrator = Arc::clone(&self.orchestrator);
                match tokio::task::spawn_blocking(move || orchestrator.request_clean_sync()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "could not record clean sync request"),
                    Err(e) => tracing::warn!(error = %e, "clean sync request task failed"),
                }
                self.next_full = Instant::now();
            }
            SyncCommand::Push(PushMessage::GlobalRuleSync) => {
                if self.rule_sync_at.is_some() {
                    return;
                }
                let deadline = self.orchestrator.sync_config().push_global_rule_sync_deadline();
                let delay = random_delay(deadline);
                tracing::debug!(delay_ms = delay.as_millis() as u64, "global rule sync scheduled");
                self.rule_sync_at = Some(deadline_after(Instant::now(), delay));
            }
        }
    }

    async fn run_session(&mut self, kind: SessionKind) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let mut task = tokio::task::spawn_blocking(move || orchestrator.run_session(kind));

        let finished = tokio::select! {
            biased;
            joined = &mut task => Some(joined),
            _ = self.shutdown.changed() => None,
        };
        let joined = match finished {
            Some(joined) => joined,
            None => {
                tracing::info!("shutdown requested; cancelling sync session");
                self.stopping = true;
                self.orchestrator.cancel();
                task.await
            }
        };

        let result = joined.unwrap_or_else(|e| {
            tracing::error!(error = %e, "sync session task failed");
            Err(SyncError::Cancelled)
        });
        self.schedule_after(kind, result);
    }

    fn schedule_after(&mut self, kind: SessionKind, result: SyncResult<SessionReport>) {
        let now = Instant::now();
        let config = self.orchestrator.sync_config();

        match result {
            Ok(report) => {
                self.backoff.record_success();
                if kind == SessionKind::Full {
                    let wait = if report.needs_retry() {
                        self.orchestrator.backoff_base()
                    } else {
                        config.full_sync_interval()
                    };
                    self.next_full = deadline_after(now, wait);
                }
            }
            Err(SyncError::Cancelled) if self.stopping => {}
            Err(SyncError::SessionInProgress) => {
                tracing::debug!("session already running elsewhere");
            }
            Err(SyncError::Halted(reason)) => {
                tracing::warn!(%reason, "sync halted; waiting for operator");
                self.next_full = deadline_after(now, config.full_sync_interval());
            }
            Err(error) => {
                let wait = self.backoff.record_failure(self.orchestrator.backoff_base());
                tracing::warn!(
                    %error,
                    ?kind,
                    failures = self.backoff.consecutive_failures(),
                    retry_in_secs = wait.as_secs(),
                    "sync session failed; backing off"
                );
                match kind {
                    SessionKind::Full => self.next_full = deadline_after(now, wait),
                    SessionKind::RuleOnly => self.rule_sync_at = Some(deadline_after(now, wait)),
                }
            }
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// `now + wait`, with `wait` capped at [`MAX_SYNC_INTERVAL_SECS`].
fn deadline_after(now: Instant, wait: Duration) -> Instant {
    let wait = wait.min(Duration::from_secs(MAX_SYNC_INTERVAL_SECS));
    now.checked_add(wait).unwrap_or(now)
}

fn random_delay(deadline: Duration) -> Duration {
    let millis = deadline.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}
