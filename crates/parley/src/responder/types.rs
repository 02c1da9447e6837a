//! Wire types for the responder backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat completion request (OpenAI-compatible format).
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat completion response.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

/// A single completion choice.
#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

/// Assistant message of a choice. Content can be null when the model
/// refuses or only calls tools.
#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Body posted to a remote reply backend.
#[derive(Debug, Serialize)]
pub struct BackendRequest<'a> {
    pub numero: &'a str,
    pub mensaje: &'a str,
}

/// Keys checked, in order, for the reply text in a backend response.
const REPLY_KEYS: [&str; 6] = ["response", "message", "data", "respuesta", "texto", "reply"];

/// Pull the reply text out of a backend response body.
///
/// Takes the first non-empty string under one of the known keys, or the
/// body itself when it is a bare JSON string.
pub fn extract_reply(body: &Value) -> Option<String> {
    if let Value::String(text) = body {
        return non_empty(text);
    }
    REPLY_KEYS
        .iter()
        .filter_map(|key| body.get(key).and_then(Value::as_str))
        .find_map(non_empty)
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
