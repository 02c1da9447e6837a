//! The bot runtime.
//!
//! One task owns the connection supervisor and the message aggregator and
//! drives them from a single `select!` loop: control commands, transport
//! signals, debounce timers, the reconnect deadline, keepalive and
//! housekeeping ticks, and completions of spawned reply tasks. Nothing else
//! mutates that state, so it needs no locks.
//!
//! Reply generation (responder call plus send) runs in spawned tasks so a
//! slow conversation never holds up another one.

pub mod handle;
pub mod reply;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, error, info, warn};

use parley_transport_protocol::RawMessage;

use crate::config::Config;
use crate::connection::{
    ConnectionHandle, ConnectionRequest, ConnectionSupervisor, SessionSignal, SupervisorConfig,
};
use crate::dispatch::{BotStats, DispatchConfig, OutboundDispatcher};
use crate::pipeline::{AggregatorConfig, FlushOutcome, MessageAggregator, extract_text};
use crate::responder::Responder;
use crate::store::CredentialStore;
use crate::transport::Transport;

pub use handle::{BotHandle, BotStatus, ResponderStatus, RuntimeError};
pub use reply::{BatchReport, ReplyConfig, ReplyPipeline};

use handle::BotCommand;

/// Everything the runtime needs to know, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Start a session as soon as the loop runs.
    pub auto_init: bool,
    pub auto_reply: bool,
    pub keepalive: Duration,
    pub housekeeping: Duration,
    pub connect_wait: Duration,
    pub supervisor: SupervisorConfig,
    pub aggregator: AggregatorConfig,
    pub dispatch: DispatchConfig,
    pub reply: ReplyConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_init: true,
            auto_reply: true,
            keepalive: Duration::from_secs(30),
            housekeeping: Duration::from_secs(30 * 60),
            connect_wait: crate::connection::handle::DEFAULT_CONNECT_WAIT,
            supervisor: SupervisorConfig::default(),
            aggregator: AggregatorConfig::default(),
            dispatch: DispatchConfig::default(),
            reply: ReplyConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_init: config.connection.auto_init,
            auto_reply: config.pipeline.auto_reply,
            keepalive: config.connection.keepalive(),
            housekeeping: config.pipeline.housekeeping(),
            connect_wait: config.connection.connect_wait(),
            supervisor: config.connection.supervisor(),
            aggregator: config.pipeline.aggregator(),
            dispatch: config.dispatch.dispatch(),
            reply: config.pipeline.reply(),
        }
    }
}

pub struct BotRuntime {
    supervisor: ConnectionSupervisor,
    aggregator: MessageAggregator,
    replies: Arc<ReplyPipeline>,
    responder: Arc<dyn Responder>,
    stats: Arc<BotStats>,
    auto_init: bool,
    auto_reply: bool,
    seen_wipe_epoch: u64,
    keepalive: Interval,
    housekeeping: Interval,
    commands: mpsc::UnboundedReceiver<BotCommand>,
    requests: mpsc::UnboundedReceiver<ConnectionRequest>,
    signals: mpsc::UnboundedReceiver<SessionSignal>,
    inflight: JoinSet<BatchReport>,
}

impl BotRuntime {
    /// Wire up the runtime and spawn its loop.
    pub fn spawn(
        config: RuntimeConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        responder: Arc<dyn Responder>,
    ) -> (BotHandle, JoinHandle<()>) {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let supervisor =
            ConnectionSupervisor::new(transport.clone(), credentials, config.supervisor, signals_tx);
        let connection = ConnectionHandle::new(requests_tx, supervisor.subscribe(), config.connect_wait);

        let stats = Arc::new(BotStats::new());
        let dispatcher = Arc::new(OutboundDispatcher::new(
            transport,
            connection.clone(),
            stats.clone(),
            config.dispatch,
        ));
        let replies = Arc::new(ReplyPipeline::new(
            dispatcher.clone(),
            responder.clone(),
            stats.clone(),
            config.reply,
        ));

        let now = Instant::now();
        let mut keepalive = interval_at(now + config.keepalive, config.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = interval_at(now + config.housekeeping, config.housekeeping);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let runtime = Self {
            supervisor,
            aggregator: MessageAggregator::new(config.aggregator),
            replies,
            responder: responder.clone(),
            stats: stats.clone(),
            auto_init: config.auto_init,
            auto_reply: config.auto_reply,
            seen_wipe_epoch: 0,
            keepalive,
            housekeeping,
            commands,
            requests,
            signals,
            inflight: JoinSet::new(),
        };
        let task = tokio::spawn(runtime.run());

        let handle = BotHandle::new(commands_tx, connection, dispatcher, responder, stats);
        (handle, task)
    }

    async fn run(mut self) {
        info!(
            auto_init = self.auto_init,
            auto_reply = self.auto_reply,
            responder = self.responder.name(),
            "Bot runtime started"
        );
        if self.auto_init {
            self.supervisor.start();
        }

        loop {
            let reconnect_at = self.supervisor.reconnect_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(BotCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All bot handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                Some(request) = self.requests.recv() => self.handle_request(request),
                Some(signal) = self.signals.recv() => {
                    let now = Instant::now();
                    if let Some(message) = self.supervisor.handle_signal(signal, now).await {
                        self.on_inbound(message, now);
                    }
                }
                Some(conversation_id) = self.aggregator.next_due(), if self.aggregator.has_pending_timers() => {
                    let outcome = self.aggregator.flush(&conversation_id, Instant::now());
                    self.handle_flush(outcome);
                }
                () = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.supervisor.on_reconnect_due();
                }
                _ = self.keepalive.tick(), if self.supervisor.keepalive_enabled() => {
                    self.supervisor.keepalive_tick();
                }
                _ = self.housekeeping.tick() => self.housekeep(),
                Some(result) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    self.on_batch_finished(result);
                }
            }

            self.sync_wipe();
        }

        info!("Bot runtime stopped");
    }

    async fn handle_command(&mut self, command: BotCommand) {
        match command {
            BotCommand::Initialize { reply } => {
                let outcome = self.supervisor.initialize();
                info!(?outcome, "Initialize requested");
                let _ = reply.send(outcome);
            }
            BotCommand::ClearSession { reply } => {
                self.supervisor.clear_session().await;
                self.sync_wipe();
                let _ = reply.send(());
            }
            BotCommand::ResetChallengeWindow { reply } => {
                self.supervisor.reset_challenge_window(Instant::now());
                let _ = reply.send(());
            }
            BotCommand::SetAutoReply { enabled, reply } => {
                if self.auto_reply != enabled {
                    info!(enabled, "Auto-reply toggled");
                }
                self.auto_reply = enabled;
                let _ = reply.send(enabled);
            }
            BotCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            BotCommand::Conversations { reply } => {
                let _ = reply.send(self.aggregator.snapshot(Instant::now()));
            }
            BotCommand::Shutdown { reply } => {
                // Handled in the loop.
                let _ = reply.send(());
            }
        }
    }

    fn handle_request(&mut self, request: ConnectionRequest) {
        match request {
            ConnectionRequest::EnsureConnected { force, reply } => {
                let outcome = self.supervisor.ensure_connected(force);
                let _ = reply.send(outcome);
            }
        }
    }

    /// Filter, deduplicate, count, and buffer one inbound message.
    fn on_inbound(&mut self, message: RawMessage, now: Instant) {
        let text = match extract_text(&message) {
            Ok(text) => text,
            Err(reason) => {
                debug!(message_id = %message.id, %reason, "Ignoring inbound message");
                return;
            }
        };

        if !self.aggregator.accept(&message.id) {
            self.stats.record_duplicate();
            debug!(message_id = %message.id, "Duplicate message dropped");
            return;
        }
        self.stats.record_received();
        debug!(
            conversation = %message.conversation_id,
            message_id = %message.id,
            group = message.is_group(),
            "Message received"
        );

        if !self.auto_reply {
            return;
        }
        if let Some(outcome) = self.aggregator.on_message(&message, text, now) {
            self.handle_flush(outcome);
        }
    }

    fn handle_flush(&mut self, outcome: FlushOutcome) {
        match outcome {
            FlushOutcome::Ready(batch) => {
                info!(
                    conversation = %batch.conversation_id,
                    messages = batch.message_count,
                    span_ms = batch.span.as_millis() as u64,
                    "Processing batch"
                );
                let replies = self.replies.clone();
                self.inflight.spawn(async move { replies.run(batch).await });
            }
            FlushOutcome::CoolingDown {
                conversation_id,
                dropped,
                remaining,
            } => {
                self.stats.record_cooldown_drop();
                info!(
                    conversation = %conversation_id,
                    dropped,
                    remaining_secs = remaining.as_secs(),
                    "Conversation cooling down, batch dropped"
                );
            }
            FlushOutcome::Empty => {}
        }
    }

    fn on_batch_finished(&mut self, result: Result<BatchReport, JoinError>) {
        match result {
            Ok(report) if report.delivered => {
                self.aggregator
                    .record_reply(&report.conversation_id, Instant::now());
            }
            Ok(report) => {
                debug!(conversation = %report.conversation_id, "Nothing delivered, no cooldown");
            }
            Err(e) if e.is_cancelled() => debug!("Reply task cancelled"),
            Err(e) => error!(error = %e, "Reply task failed"),
        }
    }

    /// Drop per-conversation state when the supervisor wiped the session.
    fn sync_wipe(&mut self) {
        let epoch = self.supervisor.wipe_epoch();
        if epoch == self.seen_wipe_epoch {
            return;
        }
        self.seen_wipe_epoch = epoch;
        let dropped = self.aggregator.reset();
        let aborted = self.inflight.len();
        self.inflight.abort_all();
        info!(
            epoch,
            dropped_buffers = dropped,
            aborted_replies = aborted,
            "Conversation state cleared after session wipe"
        );
    }

    fn housekeep(&mut self) {
        let cooldowns = self.aggregator.sweep(Instant::now());
        let conversations = self.responder.sweep_idle();
        debug!(cooldowns, conversations, "Housekeeping done");
    }

    fn status(&self) -> BotStatus {
        let now = Instant::now();
        let window = self.supervisor.window();
        BotStatus {
            connection: self.supervisor.snapshot(),
            challenge_remaining_ms: window
                .remaining(now)
                .map(|remaining| remaining.as_millis() as u64),
            auto_reply: self.auto_reply,
            pending_conversations: self.aggregator.pending_conversations(),
            tracked_cooldowns: self.aggregator.tracked_cooldowns(),
            replies_in_flight: self.inflight.len(),
            responder: ResponderStatus {
                name: self.responder.name(),
                active_conversations: self.responder.active_conversations(),
            },
            stats: self.stats.snapshot(),
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down bot runtime");
        let aborted = self.inflight.len();
        if aborted > 0 {
            warn!(aborted, "Abandoning replies in flight");
        }
        self.inflight.abort_all();
        self.supervisor.shutdown().await;
    }
}
