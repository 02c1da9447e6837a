//! Cloneable handle for talking to a running bot.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::connection::{ConnectionHandle, ConnectionSnapshot, InitializeOutcome};
use crate::dispatch::{BotStats, DispatchError, OutboundDispatcher, SendReceipt, StatsSnapshot};
use crate::pipeline::BufferSnapshot;
use crate::responder::Responder;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("bot runtime is not running")]
    Stopped,
}

/// Commands handled by the runtime loop.
#[derive(Debug)]
pub(crate) enum BotCommand {
    Initialize {
        reply: oneshot::Sender<InitializeOutcome>,
    },
    ClearSession {
        reply: oneshot::Sender<()>,
    },
    ResetChallengeWindow {
        reply: oneshot::Sender<()>,
    },
    SetAutoReply {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<BotStatus>,
    },
    Conversations {
        reply: oneshot::Sender<Vec<BufferSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Point-in-time view of the whole bot.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    #[serde(flatten)]
    pub connection: ConnectionSnapshot,
    /// Time left in the challenge window, while one is open.
    pub challenge_remaining_ms: Option<u64>,
    pub auto_reply: bool,
    pub pending_conversations: usize,
    pub tracked_cooldowns: usize,
    pub replies_in_flight: usize,
    pub responder: ResponderStatus,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponderStatus {
    pub name: &'static str,
    pub active_conversations: usize,
}

#[derive(Clone)]
pub struct BotHandle {
    commands: mpsc::UnboundedSender<BotCommand>,
    connection: ConnectionHandle,
    dispatcher: Arc<OutboundDispatcher>,
    responder: Arc<dyn Responder>,
    stats: Arc<BotStats>,
}

impl BotHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<BotCommand>,
        connection: ConnectionHandle,
        dispatcher: Arc<OutboundDispatcher>,
        responder: Arc<dyn Responder>,
        stats: Arc<BotStats>,
    ) -> Self {
        Self {
            commands,
            connection,
            dispatcher,
            responder,
            stats,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BotCommand,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| RuntimeError::Stopped)?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Start a session unless one is connected or coming up.
    pub async fn initialize(&self) -> Result<InitializeOutcome, RuntimeError> {
        self.request(|reply| BotCommand::Initialize { reply }).await
    }

    /// Log out, wipe credentials, and stop reconnecting.
    pub async fn clear_session(&self) -> Result<(), RuntimeError> {
        self.request(|reply| BotCommand::ClearSession { reply }).await
    }

    pub async fn reset_challenge_window(&self) -> Result<(), RuntimeError> {
        self.request(|reply| BotCommand::ResetChallengeWindow { reply })
            .await
    }

    /// Turn automatic replies on or off. Returns the new setting.
    pub async fn set_auto_reply(&self, enabled: bool) -> Result<bool, RuntimeError> {
        self.request(|reply| BotCommand::SetAutoReply { enabled, reply })
            .await
    }

    pub async fn status(&self) -> Result<BotStatus, RuntimeError> {
        self.request(|reply| BotCommand::Status { reply }).await
    }

    /// Conversations with buffered messages waiting to flush.
    pub async fn conversations(&self) -> Result<Vec<BufferSnapshot>, RuntimeError> {
        self.request(|reply| BotCommand::Conversations { reply })
            .await
    }

    /// Send a message outside the auto-reply flow.
    pub async fn send_message(&self, to: &str, text: &str) -> Result<SendReceipt, DispatchError> {
        self.dispatcher.send(to, text).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drop responder memory for one conversation, or all of them.
    pub fn forget_conversation(&self, conversation_id: Option<&str>) -> usize {
        self.responder.forget(conversation_id)
    }

    /// Stop the runtime loop and close the transport.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|reply| BotCommand::Shutdown { reply }).await
    }
}
