//! Outbound message dispatch.

pub mod address;
pub mod dispatcher;
pub mod stats;

use thiserror::Error;

use crate::transport::TransportError;

pub use address::AddressPolicy;
pub use dispatcher::{DispatchConfig, OutboundDispatcher, SendReceipt};
pub use stats::{BotStats, StatsSnapshot};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("message text is empty")]
    EmptyText,

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
}
