//! Sends outbound messages, reconnecting once per retry when the connection
//! turns out to be gone.

use std::sync::Arc;

use parley_transport_protocol::Presence;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::address::AddressPolicy;
use super::stats::BotStats;
use super::DispatchError;
use crate::connection::ConnectionHandle;
use crate::transport::Transport;

/// Default number of retries after a connection-class send failure.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub addresses: AddressPolicy,
    pub max_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            addresses: AddressPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Proof of delivery to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub address: String,
    /// Total send attempts, including the successful one.
    pub attempts: u32,
}

pub struct OutboundDispatcher {
    transport: Arc<dyn Transport>,
    connection: ConnectionHandle,
    stats: Arc<BotStats>,
    config: DispatchConfig,
}

impl OutboundDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        connection: ConnectionHandle,
        stats: Arc<BotStats>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            transport,
            connection,
            stats,
            config,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Send `text` to `to` (a phone number or a qualified address).
    ///
    /// Waits for the session to come up if it is not connected. A
    /// connection-class failure triggers a supervised reconnect and a retry,
    /// up to the configured number of retries. Updates the sent/error counters.
    pub async fn send(&self, to: &str, text: &str) -> Result<SendReceipt, DispatchError> {
        let result = self.send_with_retry(to, text).await;
        match &result {
            Ok(receipt) => {
                self.stats.record_sent();
                debug!(address = %receipt.address, attempts = receipt.attempts, "Message sent");
            }
            Err(e) => {
                self.stats.record_error();
                warn!(to, error = %e, "Message not sent");
            }
        }
        result
    }

    async fn send_with_retry(&self, to: &str, text: &str) -> Result<SendReceipt, DispatchError> {
        let address = self.config.addresses.normalize(to)?;
        if text.trim().is_empty() {
            return Err(DispatchError::EmptyText);
        }

        if !self.connection.ensure_connected(false).await {
            return Err(DispatchError::NotConnected);
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.transport.send(&address, text).await {
                Ok(()) => return Ok(SendReceipt { address, attempts }),
                Err(e) if e.is_connection_error() && attempts <= self.config.max_retries => {
                    info!(
                        attempt = attempts,
                        error = %e,
                        "Connection lost while sending, reconnecting"
                    );
                    if !self.connection.ensure_connected(true).await {
                        return Err(DispatchError::Transport(e));
                    }
                }
                Err(e) => return Err(DispatchError::Transport(e)),
            }
        }
    }

    /// Send once without reconnecting. Used for best-effort notices.
    pub async fn send_once(&self, to: &str, text: &str) -> Result<(), DispatchError> {
        let address = self.config.addresses.normalize(to)?;
        if !self.connection.is_connected() {
            return Err(DispatchError::NotConnected);
        }
        match self.transport.send(&address, text).await {
            Ok(()) => {
                self.stats.record_sent();
                Ok(())
            }
            Err(e) => {
                self.stats.record_error();
                Err(e.into())
            }
        }
    }

    /// Best-effort presence update for a conversation.
    pub async fn announce(&self, presence: Presence, to: &str) {
        if !self.connection.is_connected() {
            return;
        }
        let Ok(address) = self.config.addresses.normalize(to) else {
            return;
        };
        if let Err(e) = self.transport.set_presence(presence, Some(&address)).await {
            debug!(error = %e, ?presence, "Presence update failed");
        }
    }
}
