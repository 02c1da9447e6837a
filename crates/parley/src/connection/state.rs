//! Connection state types published by the supervisor.

use std::fmt;

use chrono::{DateTime, Utc};
use parley_transport_protocol::CloseReason;
use serde::Serialize;

/// Lifecycle state of the single transport session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session has been started (or it was cleared).
    #[default]
    Idle,
    /// An attempt is opening the transport.
    Connecting,
    /// The transport issued an authentication challenge and waits for it to be completed.
    AwaitingChallenge,
    /// Authenticated and able to send.
    Connected,
    /// The session ended. A reconnect may be scheduled.
    Closed,
}

impl SessionState {
    /// Whether an attempt is in flight (opened but not yet authenticated).
    pub fn is_attempting(&self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingChallenge)
    }

    /// Whether a session exists in any form.
    pub fn is_live(&self) -> bool {
        self.is_attempting() || *self == Self::Connected
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingChallenge => "awaiting_challenge",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The challenge currently shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthChallenge {
    pub code: String,
    pub issued_at: DateTime<Utc>,
    /// 1-based attempt within the current challenge window.
    pub attempt: u32,
}

/// Notable conditions reported by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorCondition {
    /// The challenge window ran out. Requires a manual challenge-window reset.
    ChallengeWindowExpired,
    /// The account was logged out. Credentials were wiped; requires re-initialization.
    AuthRevoked,
    /// Another client took over. Credentials are kept for a manual retry.
    SessionReplaced,
    /// Stored credentials were corrupt and have been wiped. Recovers on its own.
    CorruptSession,
}

impl SupervisorCondition {
    /// Terminal conditions stop automatic reconnection.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::CorruptSession)
    }

    /// Condition reported for a terminal close.
    pub fn for_terminal_close(reason: CloseReason) -> Option<Self> {
        match reason {
            CloseReason::LoggedOut => Some(Self::AuthRevoked),
            CloseReason::ConnectionReplaced => Some(Self::SessionReplaced),
            CloseReason::ChallengeExpired => Some(Self::ChallengeWindowExpired),
            _ => None,
        }
    }
}

/// Point-in-time view of the connection, published on every transition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionSnapshot {
    pub state: SessionState,
    pub challenge: Option<AuthChallenge>,
    pub has_valid_session: bool,
    pub auto_reconnect: bool,
    pub condition: Option<SupervisorCondition>,
    pub last_close: Option<CloseReason>,
    pub connected_since: Option<DateTime<Utc>>,
    pub generation: u64,
}

impl ConnectionSnapshot {
    /// No connection will come up without an operator action.
    pub fn is_halted(&self) -> bool {
        if self.condition.is_some_and(|c| c.is_terminal()) {
            return true;
        }
        !self.auto_reconnect && matches!(self.state, SessionState::Idle | SessionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempting_states() {
        assert!(SessionState::Connecting.is_attempting());
        assert!(SessionState::AwaitingChallenge.is_attempting());
        assert!(!SessionState::Connected.is_attempting());
        assert!(SessionState::Connected.is_live());
        assert!(!SessionState::Closed.is_live());
        assert!(!SessionState::Idle.is_live());
    }

    #[test]
    fn terminal_conditions() {
        assert!(SupervisorCondition::AuthRevoked.is_terminal());
        assert!(SupervisorCondition::SessionReplaced.is_terminal());
        assert!(SupervisorCondition::ChallengeWindowExpired.is_terminal());
        assert!(!SupervisorCondition::CorruptSession.is_terminal());
    }

    #[test]
    fn halted_snapshot() {
        let mut snapshot = ConnectionSnapshot {
            state: SessionState::Closed,
            auto_reconnect: true,
            ..Default::default()
        };
        assert!(!snapshot.is_halted());

        snapshot.auto_reconnect = false;
        assert!(snapshot.is_halted());

        snapshot.auto_reconnect = true;
        snapshot.condition = Some(SupervisorCondition::SessionReplaced);
        assert!(snapshot.is_halted());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::AwaitingChallenge).unwrap();
        assert_eq!(json, "\"awaiting_challenge\"");
    }
}
