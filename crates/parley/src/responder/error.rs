//! Responder error types.

use thiserror::Error;

/// Check an HTTP response for rate-limit errors, returning `RateLimit` for 429.
pub fn check_response_error(response: &reqwest::Response) -> Option<ResponderError> {
    if response.status().is_success() {
        return None;
    }
    if response.status().as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Some(ResponderError::RateLimit { retry_after });
    }
    None
}

/// Errors that can occur while producing a reply.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// Upstream answered without any usable text
    #[error("responder returned no reply")]
    EmptyReply,

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}
