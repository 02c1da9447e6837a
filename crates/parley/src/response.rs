//! JSON error responses for the control plane.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::dispatch::DispatchError;
use crate::runtime::RuntimeError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error(StatusCode::BAD_REQUEST, message)
}

pub fn unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "missing or invalid admin token")
}

pub fn service_unavailable(message: impl Into<String>) -> Response {
    error(StatusCode::SERVICE_UNAVAILABLE, message)
}

pub fn bad_gateway(message: impl Into<String>) -> Response {
    error(StatusCode::BAD_GATEWAY, message)
}

impl IntoResponse for RuntimeError {
    fn into_response(self) -> Response {
        service_unavailable(self.to_string())
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match self {
            DispatchError::InvalidAddress(_) | DispatchError::EmptyText => {
                bad_request(self.to_string())
            }
            DispatchError::NotConnected => service_unavailable(self.to_string()),
            DispatchError::Transport(_) => bad_gateway(self.to_string()),
        }
    }
}
