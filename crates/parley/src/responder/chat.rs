//! OpenAI-compatible chat completions responder.
//!
//! Works with OpenAI, OpenRouter, Ollama, and other compatible APIs.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use tokio::time::Instant;
use tracing::debug;

use super::Responder;
use super::error::{ResponderError, check_response_error};
use super::types::{ChatRequest, ChatResponse, Message};
use crate::config::ChatResponderConfig;

/// Remembered exchange with one conversation.
struct History {
    messages: Vec<Message>,
    last_active: Instant,
}

pub struct ChatResponder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    history_limit: usize,
    idle_ttl: Duration,
    conversations: DashMap<String, History>,
}

impl ChatResponder {
    pub fn new(client: Client, config: &ChatResponderConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            history_limit: config.history_limit,
            idle_ttl: Duration::from_secs(config.idle_ttl_minutes * 60),
            conversations: DashMap::new(),
        }
    }

    /// System prompt, remembered history, then the new user text.
    fn build_messages(&self, conversation_id: &str, text: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history_limit + 2);
        messages.push(Message::system(&self.system_prompt));
        if let Some(history) = self.conversations.get(conversation_id) {
            messages.extend(history.messages.iter().cloned());
        }
        messages.push(Message::user(text));
        messages
    }

    fn remember(&self, conversation_id: &str, text: &str, reply: &str) {
        let mut history = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| History {
                messages: Vec::new(),
                last_active: Instant::now(),
            });
        history.messages.push(Message::user(text));
        history.messages.push(Message::assistant(reply));
        let excess = history.messages.len().saturating_sub(self.history_limit);
        history.messages.drain(..excess);
        history.last_active = Instant::now();
    }
}

#[async_trait]
impl Responder for ChatResponder {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn respond(&self, conversation_id: &str, text: &str) -> Result<String, ResponderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(conversation_id, text),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.json(&request).send().await?;

        if let Some(err) = check_response_error(&response) {
            return Err(err);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ResponderError::Api { status, message });
        }

        let response: ChatResponse = response.json().await?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ResponderError::EmptyReply)?;

        self.remember(conversation_id, text, &reply);
        debug!(
            conversation = %conversation_id,
            reply_len = reply.len(),
            "Chat completion received"
        );
        Ok(reply)
    }

    fn forget(&self, conversation_id: Option<&str>) -> usize {
        match conversation_id {
            Some(id) => usize::from(self.conversations.remove(id).is_some()),
            None => {
                let count = self.conversations.len();
                self.conversations.clear();
                count
            }
        }
    }

    fn sweep_idle(&self) -> usize {
        let before = self.conversations.len();
        let now = Instant::now();
        self.conversations
            .retain(|_, history| now.duration_since(history.last_active) <= self.idle_ttl);
        let removed = before.saturating_sub(self.conversations.len());
        if removed > 0 {
            debug!(removed, "Forgot idle conversations");
        }
        removed
    }

    fn active_conversations(&self) -> usize {
        self.conversations.len()
    }
}
