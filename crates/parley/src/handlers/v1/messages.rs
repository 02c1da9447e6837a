use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Phone number or full address.
    pub to: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub address: String,
    pub attempts: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetResponderRequest {
    /// Omit to reset every conversation.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponderResponse {
    pub forgotten: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/messages
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    match state.bot.send_message(&req.to, &req.text).await {
        Ok(receipt) => {
            let resp = SendMessageResponse {
                address: receipt.address,
                attempts: receipt.attempts,
            };
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/responder/reset
pub async fn reset_responder(
    State(state): State<AppState>,
    Json(req): Json<ResetResponderRequest>,
) -> Response {
    let forgotten = state
        .bot
        .forget_conversation(req.conversation_id.as_deref());
    (StatusCode::OK, Json(ResetResponderResponse { forgotten })).into_response()
}
