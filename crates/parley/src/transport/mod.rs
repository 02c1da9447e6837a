//! Transport abstraction.
//!
//! A [`Transport`] owns the actual chat network session. Parley only ever has
//! one session open at a time: every [`Transport::open`] starts a new session
//! and returns the event stream for it. The stream ends when the session ends.

pub mod subprocess;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use parley_transport_protocol::{Presence, TransportEvent};
pub use subprocess::SubprocessTransport;

use crate::store::Credentials;

/// Status code the transport reports when a request needs an open connection.
const PRECONDITION_REQUIRED: u16 = 428;

/// Error message fragments that mean the underlying connection is gone.
const CONNECTION_ERROR_MARKERS: &[&str] = &[
    "connection closed",
    "connection lost",
    "socket not open",
    "cannot read properties of undefined",
    "not connected",
];

/// Errors from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport session is not open")]
    NotOpen,

    #[error("transport connection closed")]
    ConnectionClosed,

    #[error("transport rejected request (status {status_code:?}): {message}")]
    Rejected {
        status_code: Option<u16>,
        message: String,
    },

    #[error("timed out waiting for transport acknowledgement")]
    Timeout,

    #[error("failed to spawn transport: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid transport message: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the error means the connection dropped (as opposed to the
    /// request itself being bad). Connection-class send failures are worth a
    /// reconnect and retry.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::NotOpen | Self::ConnectionClosed => true,
            Self::Rejected {
                status_code: Some(PRECONDITION_REQUIRED),
                ..
            } => true,
            Self::Rejected { message, .. } => {
                let message = message.to_lowercase();
                CONNECTION_ERROR_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Self::Timeout | Self::Spawn(_) | Self::Protocol(_) => false,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a new session, closing any previous one.
    ///
    /// Resumes from `credentials` when given; otherwise the transport will
    /// issue an authentication challenge.
    async fn open(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Send a text message to a fully-qualified address.
    async fn send(&self, address: &str, text: &str) -> Result<(), TransportError>;

    /// Announce presence, globally or to one conversation.
    async fn set_presence(
        &self,
        presence: Presence,
        address: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Log the account out, invalidating the credentials remotely.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Close the current session without logging out. Idempotent.
    async fn close(&self);
}
