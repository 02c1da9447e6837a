use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::pipeline::BufferSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<BufferSnapshot>,
}

/// GET /api/v1/status
pub async fn status(State(state): State<AppState>) -> Response {
    match state.bot.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.bot.stats())).into_response()
}

/// GET /api/v1/conversations
pub async fn conversations(State(state): State<AppState>) -> Response {
    match state.bot.conversations().await {
        Ok(conversations) => {
            (StatusCode::OK, Json(ConversationsResponse { conversations })).into_response()
        }
        Err(e) => e.into_response(),
    }
}
