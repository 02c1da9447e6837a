//! Parley - a single-session chat transport bridge with debounced AI auto-replies.

// ============================================================================
// Always Available
// ============================================================================

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod pipeline;
pub mod responder;
pub mod runtime;
pub mod store;
pub mod transport;

// ============================================================================
// Server-only (behind `server` feature)
// ============================================================================

#[cfg(feature = "server")]
pub mod handlers;
#[cfg(feature = "server")]
pub mod response;
#[cfg(feature = "server")]
pub mod server;

#[cfg(test)]
mod testing;
