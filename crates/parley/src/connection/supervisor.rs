//! Connection supervisor.
//!
//! Owns the lifecycle of the single transport session. It is driven from the
//! runtime loop: transport events arrive as [`SessionSignal`]s tagged with the
//! session generation that produced them, and signals from an older
//! generation are ignored.
//!
//! ```text
//!  start()
//!    │  generation += 1, spawn attempt task
//!    ▼
//!  Connecting ──challenge──▶ AwaitingChallenge ──open──▶ Connected
//!    │                          │                          │
//!    └──────────────close───────┴──────────close───────────┘
//!                               ▼
//!                            Closed ──policy──▶ reconnect deadline / terminal
//! ```
//!
//! Every transition publishes a [`ConnectionSnapshot`] on a watch channel.
//!
//! Transport teardown (logout, close) runs in background tasks chained one
//! after another, so a slow transport never stalls the runtime loop. The next
//! attempt waits for the pending teardown before it opens.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parley_transport_protocol::{
    CloseInfo, CloseReason, ConnectionPhase, ConnectionUpdate, Presence, RawMessage,
    TransportEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::challenge::{ChallengeOutcome, ChallengeWindow, DEFAULT_CHALLENGE_WINDOW};
use super::handle::EnsureOutcome;
use super::policy::{self, ReconnectDecision};
use super::state::{AuthChallenge, ConnectionSnapshot, SessionState, SupervisorCondition};
use crate::store::{CredentialStore, Credentials};
use crate::transport::Transport;

/// Completion of a background teardown. Cloneable so both the supervisor and
/// the next attempt can wait on it.
type Teardown = Shared<BoxFuture<'static, ()>>;

/// Supervisor timing settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Ceiling for completing an authentication challenge.
    pub challenge_window: Duration,
    /// Delay before reconnecting after wiping a corrupt session.
    pub corrupt_session_restart: Duration,
    /// Delay before reconnecting after a manual challenge-window reset.
    pub manual_restart: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            challenge_window: DEFAULT_CHALLENGE_WINDOW,
            corrupt_session_restart: Duration::from_millis(2000),
            manual_restart: Duration::from_millis(1000),
        }
    }
}

/// Something that happened to a session generation.
#[derive(Debug)]
pub struct SessionSignal {
    pub generation: u64,
    pub kind: SignalKind,
}

#[derive(Debug)]
pub enum SignalKind {
    /// The transport accepted the open.
    Opened { resumed: bool },
    /// The transport could not be opened.
    OpenFailed(String),
    Event(TransportEvent),
    /// The event stream ended.
    Ended,
}

pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    config: SupervisorConfig,
    signals: mpsc::UnboundedSender<SessionSignal>,
    status: watch::Sender<ConnectionSnapshot>,

    state: SessionState,
    generation: u64,
    /// Set while an attempt task has been spawned but not yet resolved.
    connecting: bool,
    attempt: Option<JoinHandle<()>>,
    teardown: Option<Teardown>,
    challenge: Option<AuthChallenge>,
    window: ChallengeWindow,
    has_valid_session: bool,
    auto_reconnect: bool,
    keepalive: bool,
    condition: Option<SupervisorCondition>,
    last_close: Option<CloseReason>,
    connected_since: Option<chrono::DateTime<Utc>>,
    reconnect_at: Option<Instant>,
    wipe_epoch: u64,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        config: SupervisorConfig,
        signals: mpsc::UnboundedSender<SessionSignal>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionSnapshot {
            auto_reconnect: true,
            ..Default::default()
        });
        Self {
            transport,
            credentials,
            window: ChallengeWindow::new(config.challenge_window),
            config,
            signals,
            status,
            state: SessionState::Idle,
            generation: 0,
            connecting: false,
            attempt: None,
            teardown: None,
            challenge: None,
            has_valid_session: false,
            auto_reconnect: true,
            keepalive: true,
            condition: None,
            last_close: None,
            connected_since: None,
            reconnect_at: None,
            wipe_epoch: 0,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            challenge: self.challenge.clone(),
            has_valid_session: self.has_valid_session,
            auto_reconnect: self.auto_reconnect,
            condition: self.condition,
            last_close: self.last_close,
            connected_since: self.connected_since,
            generation: self.generation,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bumped on every credential wipe.
    pub fn wipe_epoch(&self) -> u64 {
        self.wipe_epoch
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn keepalive_enabled(&self) -> bool {
        self.keepalive
    }

    pub fn window(&self) -> &ChallengeWindow {
        &self.window
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }

    // ========================================================================
    // Session attempts
    // ========================================================================

    /// Start a new session generation.
    ///
    /// No-op (returns `false`) while an attempt is in flight or a session is
    /// live, so concurrent callers never open two sessions.
    pub fn start(&mut self) -> bool {
        if self.connecting || self.state.is_live() {
            debug!(state = %self.state, "Start ignored, session already in progress");
            return false;
        }

        self.connecting = true;
        self.generation += 1;
        self.state = SessionState::Connecting;
        self.challenge = None;
        self.reconnect_at = None;
        self.keepalive = true;
        info!(generation = self.generation, "Starting transport session");

        let generation = self.generation;
        let transport = self.transport.clone();
        let credentials = self.credentials.clone();
        let signals = self.signals.clone();
        let teardown = self.teardown.clone();
        self.attempt = Some(tokio::spawn(async move {
            if let Some(teardown) = teardown {
                teardown.await;
            }
            run_attempt(generation, transport, credentials, signals).await;
        }));

        self.publish();
        true
    }

    /// Handle a signal from an attempt task.
    ///
    /// Returns inbound messages for the pipeline.
    pub async fn handle_signal(&mut self, signal: SessionSignal, now: Instant) -> Option<RawMessage> {
        if signal.generation != self.generation {
            debug!(
                signal_generation = signal.generation,
                current_generation = self.generation,
                "Ignoring signal from stale session"
            );
            return None;
        }

        match signal.kind {
            SignalKind::Opened { resumed } => {
                self.has_valid_session = resumed;
                debug!(generation = self.generation, resumed, "Transport opened");
                None
            }
            SignalKind::OpenFailed(message) => {
                warn!(error = %message, "Failed to open transport");
                self.on_close(
                    CloseInfo {
                        reason: CloseReason::Unknown,
                        status_code: None,
                        message: Some(message),
                    },
                    now,
                )
                .await;
                None
            }
            SignalKind::Event(event) => self.handle_event(event, now).await,
            SignalKind::Ended => {
                if self.state.is_live() {
                    warn!("Transport event stream ended without a close");
                    let info = CloseInfo {
                        reason: CloseReason::ConnectionLost,
                        status_code: None,
                        message: None,
                    };
                    self.on_close(info, now).await;
                }
                None
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Option<RawMessage> {
        match event {
            TransportEvent::ConnectionUpdate(update) => {
                self.handle_update(update, now).await;
                None
            }
            TransportEvent::CredentialsChanged(data) => {
                if let Err(e) = self.credentials.save(&Credentials(data.credentials)).await {
                    error!(error = %e, "Failed to persist credentials");
                }
                None
            }
            TransportEvent::MessageReceived(message) => Some(message),
            TransportEvent::CommandResult(result) => {
                debug!(request_id = %result.request_id, "Ignoring stray command result");
                None
            }
        }
    }

    async fn handle_update(&mut self, update: ConnectionUpdate, now: Instant) {
        if let Some(code) = update.challenge
            && !self.on_challenge(code, now).await
        {
            return;
        }

        match update.phase {
            Some(ConnectionPhase::Open) => self.on_open(),
            Some(ConnectionPhase::Close) => {
                let info = update
                    .close
                    .unwrap_or_else(|| CloseInfo::from_status(None, None));
                self.on_close(info, now).await;
            }
            Some(ConnectionPhase::Connecting) | None => {}
        }
    }

    /// Returns `false` when the session was torn down.
    async fn on_challenge(&mut self, code: String, now: Instant) -> bool {
        if self.window.is_expired(now) {
            let elapsed = self.window.elapsed(now).unwrap_or_default();
            self.expire_window(elapsed);
            return false;
        }

        if self.has_valid_session {
            warn!("Challenge issued despite stored credentials, wiping corrupt session");
            self.end_session();
            self.wipe().await;
            self.condition = Some(SupervisorCondition::CorruptSession);
            self.reconnect_at = Some(now + self.config.corrupt_session_restart);
            self.publish();
            return false;
        }

        match self.window.on_challenge(now) {
            ChallengeOutcome::Expired { elapsed } => {
                self.expire_window(elapsed);
                false
            }
            ChallengeOutcome::Issued { attempt, remaining } => {
                info!(
                    attempt,
                    remaining_secs = remaining.as_secs(),
                    "Authentication challenge issued"
                );
                self.state = SessionState::AwaitingChallenge;
                self.challenge = Some(AuthChallenge {
                    code,
                    issued_at: Utc::now(),
                    attempt,
                });
                self.publish();
                true
            }
        }
    }

    fn expire_window(&mut self, elapsed: Duration) {
        warn!(
            elapsed_secs = elapsed.as_secs(),
            "Challenge window expired, reset it to try again"
        );
        self.auto_reconnect = false;
        self.reconnect_at = None;
        self.condition = Some(SupervisorCondition::ChallengeWindowExpired);
        self.end_session();
        self.publish();
    }

    fn on_open(&mut self) {
        info!(generation = self.generation, "Session connected");
        self.state = SessionState::Connected;
        self.connecting = false;
        self.has_valid_session = true;
        self.challenge = None;
        self.auto_reconnect = true;
        self.keepalive = true;
        self.condition = None;
        self.connected_since = Some(Utc::now());
        self.publish();
        self.announce_available();
    }

    async fn on_close(&mut self, info: CloseInfo, now: Instant) -> ReconnectDecision {
        let decision = policy::decide_within(
            info.reason,
            self.has_valid_session,
            self.window.elapsed(now),
            self.window.ceiling(),
        );
        warn!(
            reason = %info.reason,
            status_code = ?info.status_code,
            message = info.message.as_deref().unwrap_or(""),
            retry = decision.should_retry,
            terminal = decision.terminal,
            "Session closed"
        );

        self.state = SessionState::Closed;
        self.connecting = false;
        self.challenge = None;
        self.connected_since = None;
        self.last_close = Some(info.reason);
        self.release_transport(false);

        if decision.wipe_session {
            self.wipe().await;
        }

        if decision.terminal {
            self.auto_reconnect = false;
            self.condition = SupervisorCondition::for_terminal_close(info.reason);
        } else if info.reason == CloseReason::BadSession {
            self.condition = Some(SupervisorCondition::CorruptSession);
        }

        if decision.should_retry && self.auto_reconnect {
            info!(delay_ms = decision.delay.as_millis() as u64, "Reconnect scheduled");
            self.reconnect_at = Some(now + decision.delay);
        } else {
            info!("Not reconnecting automatically");
            self.reconnect_at = None;
        }

        self.publish();
        decision
    }

    /// Called by the runtime when the reconnect deadline passes.
    pub fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if !self.auto_reconnect {
            debug!("Reconnect skipped, auto-reconnect disabled");
            return;
        }
        self.start();
    }

    // ========================================================================
    // Operator actions
    // ========================================================================

    /// Start a session unless one is connected or coming up.
    ///
    /// Re-arms auto-reconnect and restarts the challenge window. Credentials
    /// are kept, so an existing session resumes without a challenge.
    pub fn initialize(&mut self) -> InitializeOutcome {
        if self.state == SessionState::Connected {
            return InitializeOutcome::AlreadyConnected;
        }
        if self.connecting || self.state.is_attempting() {
            return InitializeOutcome::InProgress;
        }

        self.reconnect_at = None;
        self.end_session();
        self.window.reset();
        self.auto_reconnect = true;
        self.condition = None;
        self.state = SessionState::Idle;
        self.start();
        InitializeOutcome::Started
    }

    /// Log out (when connected), wipe credentials, and stop.
    pub async fn clear_session(&mut self) {
        info!("Clearing session");
        self.auto_reconnect = false;
        self.reconnect_at = None;

        let logout = self.state == SessionState::Connected;
        self.release_transport(logout);
        self.reset_session_fields();
        self.wipe().await;
        self.state = SessionState::Idle;
        self.condition = None;
        self.last_close = None;
        self.publish();
    }

    /// Restart the challenge window and reconnect shortly after.
    pub fn reset_challenge_window(&mut self, now: Instant) {
        info!("Resetting challenge window");
        self.window.reset();
        self.auto_reconnect = true;
        self.condition = None;
        if self.state.is_live() || self.connecting {
            self.end_session();
        }
        self.reconnect_at = Some(now + self.config.manual_restart);
        self.publish();
    }

    /// Answer an ensure-connected request.
    pub fn ensure_connected(&mut self, force: bool) -> EnsureOutcome {
        if self.state == SessionState::Connected && !force {
            return EnsureOutcome::Ready;
        }
        if !self.auto_reconnect || self.condition.is_some_and(|c| c.is_terminal()) {
            return EnsureOutcome::Unavailable;
        }

        if force && self.state == SessionState::Connected {
            warn!("Connected session is unusable, reconnecting");
            self.end_session();
        }
        if !self.connecting && !self.state.is_live() {
            self.start();
        }
        EnsureOutcome::Pending
    }

    /// Periodic presence refresh. Disables itself once the session is down
    /// for good.
    pub fn keepalive_tick(&mut self) {
        if self.state == SessionState::Connected {
            self.announce_available();
        } else if !self.auto_reconnect {
            info!("Keepalive stopped");
            self.keepalive = false;
        }
    }

    /// Close the transport and stop reconnecting. Credentials are kept.
    ///
    /// Unlike the other operations this waits for the transport to close.
    pub async fn shutdown(&mut self) {
        self.auto_reconnect = false;
        self.reconnect_at = None;
        self.keepalive = false;
        self.end_session();
        self.publish();
        self.finish_teardown().await;
    }

    /// Wait for every pending background teardown.
    pub async fn finish_teardown(&self) {
        if let Some(teardown) = self.teardown.clone() {
            teardown.await;
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Abort the attempt task and close the transport in the background.
    fn end_session(&mut self) {
        self.release_transport(false);
        self.reset_session_fields();
    }

    fn reset_session_fields(&mut self) {
        self.connecting = false;
        self.challenge = None;
        self.connected_since = None;
        if self.state != SessionState::Idle {
            self.state = SessionState::Closed;
        }
    }

    /// Abort the attempt task and queue the transport teardown behind any
    /// teardown still running.
    fn release_transport(&mut self, logout: bool) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }

        let previous = self.teardown.take();
        let transport = self.transport.clone();
        let generation = self.generation;
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            if logout && let Err(e) = transport.logout().await {
                warn!(error = %e, "Logout failed, wiping anyway");
            }
            transport.close().await;
            debug!(generation, "Transport released");
        });
        self.teardown = Some(
            async move {
                if let Err(e) = task.await {
                    warn!(error = %e, "Transport teardown failed");
                }
            }
            .boxed()
            .shared(),
        );
    }

    /// Remove stored credentials and everything derived from them.
    async fn wipe(&mut self) {
        if let Err(e) = self.credentials.clear().await {
            error!(error = %e, "Failed to wipe stored credentials");
        }
        self.has_valid_session = false;
        self.window.reset();
        self.wipe_epoch += 1;
        info!(epoch = self.wipe_epoch, "Session state wiped");
    }

    fn announce_available(&self) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.set_presence(Presence::Available, None).await {
                debug!(error = %e, "Presence update failed");
            }
        });
    }
}

/// Result of [`ConnectionSupervisor::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializeOutcome {
    AlreadyConnected,
    InProgress,
    Started,
}

/// Load credentials, open the transport, and forward its events.
async fn run_attempt(
    generation: u64,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    signals: mpsc::UnboundedSender<SessionSignal>,
) {
    let send = |kind| signals.send(SessionSignal { generation, kind }).is_ok();

    let stored = match credentials.load().await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, "Failed to load credentials, starting fresh");
            None
        }
    };
    let resumed = stored.is_some();

    let mut events = match transport.open(stored).await {
        Ok(events) => events,
        Err(e) => {
            send(SignalKind::OpenFailed(e.to_string()));
            return;
        }
    };

    if !send(SignalKind::Opened { resumed }) {
        return;
    }
    while let Some(event) = events.recv().await {
        if !send(SignalKind::Event(event)) {
            return;
        }
    }
    send(SignalKind::Ended);
}
