use axum::extract::State;
use axum::http::StatusCode;

use crate::server::AppState;

/// GET /livez
pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// GET /readyz
///
/// Ready once the transport session is connected.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.bot.connection().is_connected() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not connected")
    }
}
