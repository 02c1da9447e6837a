use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connection::InitializeOutcome;
use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub outcome: InitializeOutcome,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct AutoReplyRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct AutoReplyResponse {
    pub auto_reply: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/session/initialize
pub async fn initialize(State(state): State<AppState>) -> Response {
    match state.bot.initialize().await {
        Ok(outcome) => (StatusCode::OK, Json(InitializeResponse { outcome })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/session/clear
pub async fn clear_session(State(state): State<AppState>) -> Response {
    info!("Session clear requested over HTTP");
    match state.bot.clear_session().await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/session/reset-challenge-window
pub async fn reset_challenge_window(State(state): State<AppState>) -> Response {
    match state.bot.reset_challenge_window().await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /api/v1/auto-reply
pub async fn set_auto_reply(
    State(state): State<AppState>,
    Json(req): Json<AutoReplyRequest>,
) -> Response {
    match state.bot.set_auto_reply(req.enabled).await {
        Ok(auto_reply) => (StatusCode::OK, Json(AutoReplyResponse { auto_reply })).into_response(),
        Err(e) => e.into_response(),
    }
}
