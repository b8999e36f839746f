//! Sync session state machine.

use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::logs::{LogUploader, NoLogUploader};
use crate::rules::{RuleApplier, RuleSyncResult};
use crate::transport::SyncTransport;
use crate::uploader::{BatchUploader, UploadResult};
use parking_lot::{Mutex, RwLock};
use santa_sync_protocol::{
    bounded_interval, ClientMode, ConfigRequest, SyncConfig, SyncCursor,
};
use santa_sync_store::{
    EventStore, RuleCounts, RuleStore, SessionOutcome, StateStore, SyncEngineState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Where the orchestrator is in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No session running.
    Idle,
    /// Fetching the server config.
    Config,
    /// Downloading rules.
    Rules,
    /// Uploading events.
    Events,
    /// Uploading logs.
    Logs,
}

impl SyncPhase {
    /// Returns true while a session is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncPhase::Idle)
    }
}

/// Which phases a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Config, rules, events, logs.
    Full,
    /// Config and rules only.
    RuleOnly,
}

/// Result of a session that was not aborted.
#[derive(Debug)]
pub struct SessionReport {
    /// Session kind.
    pub kind: SessionKind,
    /// [`SessionOutcome::Success`] or [`SessionOutcome::Partial`].
    pub outcome: SessionOutcome,
    /// Config the server sent.
    pub config: SyncConfig,
    /// Rule phase summary.
    pub rules: RuleSyncResult,
    /// Event phase result; `None` for rule-only sessions.
    pub upload: Option<UploadResult>,
    /// Log phase result; `None` when the phase did not run.
    pub logs_uploaded: Option<bool>,
    /// Wall time of the session.
    pub duration: Duration,
}

impl SessionReport {
    /// Returns true if queued events were left behind and another session
    /// should follow soon.
    pub fn needs_retry(&self) -> bool {
        self.upload.as_ref().is_some_and(UploadResult::needs_retry)
    }
}

/// Counters across sessions.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Sessions that finished.
    pub sessions_completed: u64,
    /// Sessions that were aborted.
    pub sessions_failed: u64,
    /// Events acknowledged by the server.
    pub events_acknowledged: u64,
    /// Rule pages applied.
    pub rule_pages: u64,
    /// When the last session ended.
    pub last_session_at: Option<Instant>,
    /// Outcome of the last session.
    pub last_outcome: Option<SessionOutcome>,
    /// Error that aborted the last failed session.
    pub last_error: Option<String>,
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current phase.
    pub phase: SyncPhase,
    /// Events waiting for upload.
    pub pending_events: usize,
    /// Local rule totals.
    pub rule_counts: RuleCounts,
    /// Saved rule cursor.
    pub cursor: SyncCursor,
    /// Mode from the last config.
    pub client_mode: ClientMode,
    /// End of the last successful session, seconds since the Unix epoch.
    pub last_successful_sync: Option<u64>,
    /// Outcome of the last session, from any process.
    pub last_outcome: Option<SessionOutcome>,
    /// Error that aborted the last session.
    pub last_error: Option<String>,
    /// A clean sync is owed, by operator or server request.
    pub clean_sync_requested: bool,
    /// Reason automatic sync is halted, if it is.
    pub halted: Option<String>,
}

/// Drives sync sessions: config, then rules, then events, then logs.
///
/// # Invariants
///
/// - At most one session runs at a time; a second caller gets
///   [`SyncError::SessionInProgress`]
/// - A phase starts only after the previous one succeeded
/// - A failed session never undoes work an earlier phase committed
/// - [`SyncEngineState`] is loaded at session start and saved at each
///   commit point, never held across sessions in memory
pub struct SyncOrchestrator<T: SyncTransport> {
    client: ClientConfig,
    transport: T,
    events: Arc<EventStore>,
    rules: Arc<dyn RuleStore>,
    state_store: Arc<dyn StateStore>,
    log_uploader: Arc<dyn LogUploader>,
    phase: RwLock<SyncPhase>,
    session: Mutex<()>,
    cancelled: AtomicBool,
    stats: RwLock<SyncStats>,
    last_config: RwLock<Option<SyncConfig>>,
}

impl<T: SyncTransport> SyncOrchestrator<T> {
    /// Creates an orchestrator. Logs are not uploaded unless a
    /// [`LogUploader`] is set.
    pub fn new(
        client: ClientConfig,
        transport: T,
        events: Arc<EventStore>,
        rules: Arc<dyn RuleStore>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            client,
            transport,
            events,
            rules,
            state_store,
            log_uploader: Arc::new(NoLogUploader),
            phase: RwLock::new(SyncPhase::Idle),
            session: Mutex::new(()),
            cancelled: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            last_config: RwLock::new(None),
        }
    }

    /// Sets the log phase collaborator.
    pub fn with_log_uploader(mut self, uploader: Arc<dyn LogUploader>) -> Self {
        self.log_uploader = uploader;
        self
    }

    /// Client configuration.
    pub fn client_config(&self) -> &ClientConfig {
        &self.client
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The event queue the monitor appends to.
    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Returns true while a session is running.
    pub fn is_busy(&self) -> bool {
        self.session.is_locked()
    }

    /// Counters across sessions.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Asks the running session to stop at its next phase boundary. If no
    /// session has started yet, the next one stops before its first phase.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    /// The most recent server config, or defaults if none was ever fetched.
    pub fn sync_config(&self) -> SyncConfig {
        if let Some(config) = self.last_config.read().clone() {
            return config;
        }
        match self.state_store.load() {
            Ok(state) => state.config.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load sync state; using default config");
                SyncConfig::default()
            }
        }
    }

    /// Delay before retrying after a failure, before growth is applied.
    /// Bounded by [`bounded_interval`], whether the server sent it or not.
    pub fn backoff_base(&self) -> Duration {
        match self.sync_config().backoff_interval() {
            Some(interval) => interval,
            None => bounded_interval(self.client.default_backoff.as_secs()),
        }
    }

    /// Records an operator request for a clean sync. The next session
    /// rebuilds the local rules from scratch and asks the server to do the
    /// same.
    ///
    /// Waits for a running session to finish first.
    pub fn request_clean_sync(&self) -> SyncResult<()> {
        let _session = self.session.lock();
        let mut state = self.state_store.load()?;
        if !state.clean_sync_requested {
            state.clean_sync_requested = true;
            self.state_store.save(&state)?;
        }
        tracing::info!("clean sync requested");
        Ok(())
    }

    /// Lifts a halt left by a permanent rejection. Returns true if sync was
    /// halted.
    pub fn clear_halt(&self) -> SyncResult<bool> {
        let _session = self.session.lock();
        let mut state = self.state_store.load()?;
        match state.halted.take() {
            Some(reason) => {
                self.state_store.save(&state)?;
                tracing::info!(%reason, "sync halt cleared by operator");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Snapshot for status reporting.
    pub fn status(&self) -> SyncResult<SyncStatus> {
        let state = self.state_store.load()?;
        let clean_sync_requested = state.clean_sync_due();
        Ok(SyncStatus {
            phase: self.phase(),
            pending_events: self.events.pending_count(),
            rule_counts: self.rules.counts(),
            cursor: state.cursor,
            client_mode: state.config.as_ref().map(|c| c.client_mode).unwrap_or_default(),
            last_successful_sync: state.last_successful_sync,
            last_outcome: state.last_outcome,
            last_error: state.last_error.clone(),
            clean_sync_requested,
            halted: state.halted,
        })
    }

    /// Runs one session.
    ///
    /// # Errors
    ///
    /// [`SyncError::SessionInProgress`] if another session is running,
    /// [`SyncError::Halted`] if a permanent rejection stopped sync, or the
    /// error that aborted the session.
    pub fn run_session(&self, kind: SessionKind) -> SyncResult<SessionReport> {
        let Some(_session) = self.session.try_lock() else {
            tracing::debug!("sync already running; trigger coalesced");
            return Err(SyncError::SessionInProgress);
        };

        let start = Instant::now();
        let result = self.run_phases(kind, start);
        self.set_phase(SyncPhase::Idle);
        self.cancelled.store(false, Ordering::SeqCst);
        self.persist_outcome(&result);

        let mut stats = self.stats.write();
        stats.last_session_at = Some(Instant::now());
        match &result {
            Ok(report) => {
                stats.sessions_completed += 1;
                stats.rule_pages += report.rules.pages as u64;
                if let Some(upload) = &report.upload {
                    stats.events_acknowledged += upload.acknowledged() as u64;
                }
                stats.last_outcome = Some(report.outcome);
                stats.last_error = None;
                tracing::info!(
                    ?kind,
                    outcome = ?report.outcome,
                    rule_pages = report.rules.pages,
                    events = report.upload.as_ref().map_or(0, UploadResult::acknowledged),
                    elapsed_ms = report.duration.as_millis() as u64,
                    "sync session finished"
                );
            }
            Err(error) => {
                stats.sessions_failed += 1;
                stats.last_outcome = Some(SessionOutcome::Failure);
                stats.last_error = Some(error.to_string());
                tracing::warn!(?kind, %error, "sync session failed");
            }
        }

        result
    }

    /// Saves how the session ended so other processes can report it.
    fn persist_outcome(&self, result: &SyncResult<SessionReport>) {
        let mut state = match self.state_store.load() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "could not load sync state to record session outcome");
                return;
            }
        };
        state.last_session_at = Some(unix_now());
        match result {
            Ok(report) => {
                state.last_outcome = Some(report.outcome);
                state.last_error = None;
            }
            Err(error) => {
                state.last_outcome = Some(SessionOutcome::Failure);
                state.last_error = Some(error.to_string());
            }
        }
        if let Err(e) = self.state_store.save(&state) {
            tracing::warn!(error = %e, "could not record session outcome");
        }
    }

    fn run_phases(&self, kind: SessionKind, start: Instant) -> SyncResult<SessionReport> {
        self.check_cancelled()?;
        let mut state = self.state_store.load()?;
        if let Some(reason) = &state.halted {
            return Err(SyncError::Halted(reason.clone()));
        }
        tracing::info!(?kind, cursor = %state.cursor, "sync session started");

        self.set_phase(SyncPhase::Config);
        let config = self.config_phase(&mut state)?;
        if config.clean_sync {
            state.clean_sync_owed = true;
        }
        let clean = state.clean_sync_due();
        if clean {
            tracing::info!(
                operator = state.clean_sync_requested,
                server = state.clean_sync_owed,
                "clean sync: discarding rule cursor"
            );
            state.cursor.reset();
        }
        state.config = Some(config.clone());
        self.state_store.save(&state)?;
        *self.last_config.write() = Some(config.clone());
        self.check_cancelled()?;

        self.set_phase(SyncPhase::Rules);
        let rules = RuleApplier::new(&self.transport, self.rules.as_ref(), self.state_store.as_ref())
            .apply_rules(&mut state, clean);
        let rules = match rules {
            Ok(rules) => rules,
            Err(error) => return Err(self.note_failure(&mut state, error)),
        };

        let mut report = SessionReport {
            kind,
            outcome: SessionOutcome::Success,
            config,
            rules,
            upload: None,
            logs_uploaded: None,
            duration: Duration::ZERO,
        };

        if kind == SessionKind::Full {
            self.check_cancelled()?;
            self.set_phase(SyncPhase::Events);
            match BatchUploader::new(&self.transport, &self.events).upload(&report.config) {
                UploadResult::Failed { error, .. } => {
                    return Err(self.note_failure(&mut state, error));
                }
                upload => {
                    if upload.needs_retry() {
                        report.outcome = SessionOutcome::Partial;
                    }
                    report.upload = Some(upload);
                }
            }

            self.check_cancelled()?;
            if let Some(url) = report.config.upload_logs_url.as_deref() {
                self.set_phase(SyncPhase::Logs);
                match self.log_uploader.upload_logs(url) {
                    Ok(()) => report.logs_uploaded = Some(true),
                    Err(error) => {
                        tracing::warn!(%error, "log upload failed");
                        report.logs_uploaded = Some(false);
                        report.outcome = SessionOutcome::Partial;
                    }
                }
            }
        }

        state.last_successful_sync = Some(unix_now());
        self.state_store.save(&state)?;
        report.duration = start.elapsed();
        Ok(report)
    }

    fn config_phase(&self, state: &mut SyncEngineState) -> SyncResult<SyncConfig> {
        let counts = self.rules.counts();
        let request = ConfigRequest {
            machine: self.client.machine.clone(),
            client_mode: state
                .config
                .as_ref()
                .map(|c| c.client_mode)
                .unwrap_or_default(),
            binary_rule_count: counts.binary,
            certificate_rule_count: counts.certificate,
            request_clean_sync: state.clean_sync_requested,
        };

        match self.transport.fetch_config(&request) {
            Ok(config) => {
                tracing::debug!(
                    mode = %config.client_mode,
                    batch_size = config.batch_size(),
                    clean_sync = config.clean_sync,
                    "config received"
                );
                Ok(config)
            }
            Err(error) => Err(self.note_failure(state, error)),
        }
    }

    /// Halts automatic sync if `error` is a permanent rejection.
    fn note_failure(&self, state: &mut SyncEngineState, error: SyncError) -> SyncError {
        if error.is_permanent() {
            tracing::error!(%error, "server permanently rejected this client; sync halted");
            state.halted = Some(error.to_string());
            if let Err(e) = self.state_store.save(state) {
                tracing::warn!(error = %e, "could not persist sync halt");
            }
        }
        error
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
