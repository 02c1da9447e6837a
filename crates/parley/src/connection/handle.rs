//! Cloneable view of the connection for code outside the runtime loop.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::state::{ConnectionSnapshot, SessionState};

/// Default time `ensure_connected` waits for a session to come up.
pub const DEFAULT_CONNECT_WAIT: Duration = Duration::from_secs(10);

/// Requests handled by the runtime loop on behalf of a [`ConnectionHandle`].
#[derive(Debug)]
pub enum ConnectionRequest {
    /// Make sure a session is connected or coming up.
    ///
    /// With `force`, a session believed to be connected is torn down and
    /// reopened (a send just proved it dead).
    EnsureConnected {
        force: bool,
        reply: oneshot::Sender<EnsureOutcome>,
    },
}

/// Immediate answer to an ensure-connected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Already connected.
    Ready,
    /// An attempt is in flight; watch the snapshot.
    Pending,
    /// Nothing will connect without an operator action.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    requests: mpsc::UnboundedSender<ConnectionRequest>,
    status: watch::Receiver<ConnectionSnapshot>,
    connect_wait: Duration,
}

impl ConnectionHandle {
    pub fn new(
        requests: mpsc::UnboundedSender<ConnectionRequest>,
        status: watch::Receiver<ConnectionSnapshot>,
        connect_wait: Duration,
    ) -> Self {
        Self {
            requests,
            status,
            connect_wait,
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status.clone()
    }

    /// Wait until a session is connected, starting one if needed.
    ///
    /// Joins an attempt already in flight instead of starting another one.
    /// Returns `false` if the session did not come up within the connect
    /// wait or cannot come up without an operator action.
    pub async fn ensure_connected(&self, force: bool) -> bool {
        if !force && self.is_connected() {
            return true;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ConnectionRequest::EnsureConnected {
            force,
            reply: reply_tx,
        };
        if self.requests.send(request).is_err() {
            debug!("Runtime stopped, cannot connect");
            return false;
        }

        match reply_rx.await {
            Ok(EnsureOutcome::Ready) => return true,
            Ok(EnsureOutcome::Unavailable) | Err(_) => return false,
            Ok(EnsureOutcome::Pending) => {}
        }

        let mut status = self.status.clone();
        let wait = status.wait_for(|s| s.state == SessionState::Connected || s.is_halted());
        match tokio::time::timeout(self.connect_wait, wait).await {
            Ok(Ok(snapshot)) => snapshot.state == SessionState::Connected,
            Ok(Err(_)) => false,
            Err(_) => {
                debug!(wait_ms = self.connect_wait.as_millis() as u64, "Timed out waiting for connection");
                false
            }
        }
    }
}
