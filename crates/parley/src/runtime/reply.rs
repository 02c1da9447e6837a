//! Turns a flushed batch into a reply on the wire.

use std::sync::Arc;
use std::time::Duration;

use parley_transport_protocol::Presence;
use tracing::{debug, error, info, warn};

use crate::dispatch::{BotStats, OutboundDispatcher};
use crate::pipeline::Batch;
use crate::responder::Responder;

pub const DEFAULT_TYPING_DELAY: Duration = Duration::from_millis(1000);

pub const DEFAULT_FALLBACK_REPLY: &str =
    "Lo siento, estoy teniendo problemas técnicos. Por favor intenta nuevamente en unos momentos.";

pub const DEFAULT_APOLOGY_REPLY: &str =
    "Disculpa, hubo un error procesando tu mensaje. Por favor intenta nuevamente.";

#[derive(Debug, Clone)]
pub struct ReplyConfig {
    /// How long the typing indicator shows before the reply. Zero skips it.
    pub typing_delay: Duration,
    /// Sent in place of a reply when the responder fails.
    pub fallback_reply: String,
    /// Sent once when the reply itself could not be delivered.
    pub apology_reply: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            typing_delay: DEFAULT_TYPING_DELAY,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            apology_reply: DEFAULT_APOLOGY_REPLY.to_string(),
        }
    }
}

/// What happened to one batch. Sent back to the runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub conversation_id: String,
    /// Whether a reply (or the fallback text) reached the transport.
    pub delivered: bool,
}

pub struct ReplyPipeline {
    dispatcher: Arc<OutboundDispatcher>,
    responder: Arc<dyn Responder>,
    stats: Arc<BotStats>,
    config: ReplyConfig,
}

impl ReplyPipeline {
    pub fn new(
        dispatcher: Arc<OutboundDispatcher>,
        responder: Arc<dyn Responder>,
        stats: Arc<BotStats>,
        config: ReplyConfig,
    ) -> Self {
        Self {
            dispatcher,
            responder,
            stats,
            config,
        }
    }

    /// Show typing, ask the responder, send the answer.
    ///
    /// Never fails: responder errors become the fallback text and send
    /// errors end in a single apology when the session is still up.
    pub async fn run(&self, batch: Batch) -> BatchReport {
        let conversation_id = batch.conversation_id;

        if !self.config.typing_delay.is_zero() {
            self.dispatcher
                .announce(Presence::Composing, &conversation_id)
                .await;
            tokio::time::sleep(self.config.typing_delay).await;
        }

        let reply = match self.responder.respond_to(&batch.origin, &batch.text).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                warn!(conversation = %conversation_id, "Responder returned an empty reply, using fallback");
                self.stats.record_error();
                self.config.fallback_reply.clone()
            }
            Err(e) => {
                warn!(
                    conversation = %conversation_id,
                    responder = self.responder.name(),
                    error = %e,
                    "Responder failed, using fallback"
                );
                self.stats.record_error();
                self.config.fallback_reply.clone()
            }
        };

        let delivered = match self.dispatcher.send(&conversation_id, &reply).await {
            Ok(receipt) => {
                self.stats.record_auto_reply();
                info!(
                    conversation = %conversation_id,
                    attempts = receipt.attempts,
                    reply_len = reply.len(),
                    "Reply sent"
                );
                true
            }
            Err(e) => {
                error!(conversation = %conversation_id, error = %e, "Failed to send reply");
                if self.dispatcher.connection().is_connected()
                    && let Err(e) = self
                        .dispatcher
                        .send_once(&conversation_id, &self.config.apology_reply)
                        .await
                {
                    debug!(conversation = %conversation_id, error = %e, "Apology not sent");
                }
                false
            }
        };

        self.dispatcher
            .announce(Presence::Available, &conversation_id)
            .await;

        BatchReport {
            conversation_id,
            delivered,
        }
    }
}
