use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use subtle::ConstantTimeEq;
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::response;
use crate::runtime::BotHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub bot: BotHandle,
    /// Bearer token required on `/api/v1` when set.
    pub admin_token: Option<Arc<str>>,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api_v1 = Router::new()
        .route("/status", get(handlers::v1::status))
        .route("/stats", get(handlers::v1::stats))
        .route("/conversations", get(handlers::v1::conversations))
        .route("/session/initialize", post(handlers::v1::initialize))
        .route("/session/clear", post(handlers::v1::clear_session))
        .route(
            "/session/reset-challenge-window",
            post(handlers::v1::reset_challenge_window),
        )
        .route("/auto-reply", put(handlers::v1::set_auto_reply))
        .route("/messages", post(handlers::v1::send_message))
        .route("/responder/reset", post(handlers::v1::reset_responder))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .with_state(state)
        .nest("/api/v1", api_v1)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}

async fn require_admin_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        next.run(request).await
    } else {
        response::unauthorized()
    }
}
