//! Reply generation for aggregated batches.
//!
//! A [`Responder`] turns the joined text of a batch into the reply sent back
//! to the conversation. Two implementations exist: [`ChatResponder`] talks to
//! an OpenAI-compatible chat completions API and keeps per-conversation
//! history, [`BackendResponder`] forwards the text to a remote HTTP backend.

mod backend;
mod chat;
mod error;
mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_transport_protocol::RawMessage;
use reqwest::Client;
use tracing::{info, warn};

use crate::config::{ResponderConfig, ResponderKind};

pub use backend::{BackendResponder, fallback_url};
pub use chat::ChatResponder;
pub use error::ResponderError;
pub use types::{ChatRequest, ChatResponse, Message, Role, extract_reply};

/// Environment variable holding the chat completions API key.
pub const CHAT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variables checked, in order, for the backend API key.
pub const BACKEND_API_KEY_ENVS: [&str; 2] = ["BOT_API_KEY", "X_API_KEY"];

#[async_trait]
pub trait Responder: Send + Sync {
    /// Short name used in logs and status output.
    fn name(&self) -> &'static str;

    /// Produce a reply for `text` sent in `conversation_id`.
    async fn respond(&self, conversation_id: &str, text: &str) -> Result<String, ResponderError>;

    /// Produce a reply for a batch opened by `origin`.
    ///
    /// Defaults to [`Responder::respond`] in the origin's conversation.
    async fn respond_to(&self, origin: &RawMessage, text: &str) -> Result<String, ResponderError> {
        self.respond(&origin.conversation_id, text).await
    }

    /// Drop remembered context for one conversation, or all of them.
    ///
    /// Returns how many conversations were forgotten.
    fn forget(&self, _conversation_id: Option<&str>) -> usize {
        0
    }

    /// Drop context of conversations that have been idle too long.
    fn sweep_idle(&self) -> usize {
        0
    }

    /// Number of conversations with remembered context.
    fn active_conversations(&self) -> usize {
        0
    }
}

/// Build the responder selected by `config`.
///
/// API keys come from the environment. A missing key is not an error: the
/// upstream decides whether it needs one.
pub fn build(config: &ResponderConfig) -> Result<Arc<dyn Responder>, ResponderError> {
    match config.kind {
        ResponderKind::Chat => {
            let chat = &config.chat;
            let client = Client::builder()
                .timeout(Duration::from_secs(chat.timeout_seconds))
                .build()?;
            let api_key = std::env::var(CHAT_API_KEY_ENV).ok();
            if api_key.is_some() {
                info!(model = %chat.model, base_url = %chat.base_url, "Chat responder configured");
            } else {
                warn!(env_var = CHAT_API_KEY_ENV, "Chat responder has no API key");
            }
            Ok(Arc::new(ChatResponder::new(client, chat, api_key)))
        }
        ResponderKind::Backend => {
            let backend = &config.backend;
            let client = Client::builder()
                .timeout(Duration::from_secs(backend.timeout_seconds))
                .build()?;
            let api_key = BACKEND_API_KEY_ENVS
                .iter()
                .find_map(|name| std::env::var(name).ok());
            let fallback = backend
                .fallback_endpoint
                .clone()
                .unwrap_or_else(|| fallback_url(&backend.endpoint));
            info!(
                endpoint = %backend.endpoint,
                fallback = %fallback,
                has_api_key = api_key.is_some(),
                "Backend responder configured"
            );
            Ok(Arc::new(BackendResponder::new(
                client,
                backend.endpoint.clone(),
                fallback,
                api_key,
            )))
        }
    }
}
