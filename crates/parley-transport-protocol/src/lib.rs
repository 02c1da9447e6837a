//! Transport protocol types for Parley.
//!
//! A transport is the black box that owns the actual chat network session
//! (pairing, encryption, socket keepalive). Parley talks to it with two
//! message types:
//!
//! - [`TransportCommand`]: Parley → transport (open, send, presence, close, logout)
//! - [`TransportEvent`]: transport → Parley (connection updates, credentials, messages)
//!
//! External transports exchange these as JSON Lines (one JSON object per line)
//! over stdio.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Address suffix for one-to-one conversations.
pub const USER_ADDRESS_SUFFIX: &str = "@s.whatsapp.net";

/// Address suffix for group conversations.
pub const GROUP_ADDRESS_SUFFIX: &str = "@g.us";

// ============================================================================
// Events (transport → Parley)
// ============================================================================

/// Events emitted by a transport session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Connection phase changed, a challenge was issued, or the session closed.
    ConnectionUpdate(ConnectionUpdate),
    /// Session credentials changed and should be persisted.
    CredentialsChanged(CredentialsChangedData),
    /// A message arrived.
    MessageReceived(RawMessage),
    /// Acknowledgement of a command that carried a `request_id`.
    CommandResult(CommandResultData),
}

/// A connection update. Any combination of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ConnectionPhase>,
    /// Authentication challenge (pairing code / QR payload).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    /// Close details, present when `phase` is `close`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<CloseInfo>,
}

/// Connection phase reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    pub reason: CloseReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CloseInfo {
    /// Build close info from a raw status code and message.
    pub fn from_status(status_code: Option<u16>, message: Option<String>) -> Self {
        let reason = CloseReason::from_status(status_code, message.as_deref().unwrap_or(""));
        Self {
            reason,
            status_code,
            message,
        }
    }
}

/// Close reasons understood by the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Stored session is corrupt and must be discarded.
    BadSession,
    /// The pending challenge expired without being completed.
    ChallengeExpired,
    /// The peer closed the connection.
    ConnectionClosed,
    /// Network connectivity was lost.
    ConnectionLost,
    /// Another client took over this session.
    ConnectionReplaced,
    /// The connection timed out.
    TimedOut,
    /// The peer asked for a restart.
    RestartRequired,
    /// The account was logged out remotely.
    LoggedOut,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

/// Message a transport attaches to a 408 when the challenge attempts run out.
const CHALLENGE_EXHAUSTED_MARKER: &str = "QR refs attempts ended";

impl CloseReason {
    /// Map a numeric status code (as reported by most web-socket transports) to a reason.
    ///
    /// 408 is shared by "connection lost" and "challenge expired"; the latter is
    /// recognised by its message.
    pub fn from_status(status_code: Option<u16>, message: &str) -> Self {
        match status_code {
            Some(401) => Self::LoggedOut,
            Some(408) if message.contains(CHALLENGE_EXHAUSTED_MARKER) => Self::ChallengeExpired,
            Some(408) => Self::ConnectionLost,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(515) => Self::RestartRequired,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadSession => "bad_session",
            Self::ChallengeExpired => "challenge_expired",
            Self::ConnectionClosed => "connection_closed",
            Self::ConnectionLost => "connection_lost",
            Self::ConnectionReplaced => "connection_replaced",
            Self::TimedOut => "timed_out",
            Self::RestartRequired => "restart_required",
            Self::LoggedOut => "logged_out",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque credential blob to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsChangedData {
    pub credentials: serde_json::Value,
}

/// Result of a command that carried a `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResultData {
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

// ============================================================================
// Messages
// ============================================================================

/// A message as delivered by the transport, before any filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Transport-assigned message id (used for deduplication).
    pub id: String,
    /// Fully-qualified conversation address.
    pub conversation_id: String,
    /// Whether the message was sent by this account.
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Message payload; absent for protocol/stub messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

impl RawMessage {
    /// Whether the conversation is a group.
    pub fn is_group(&self) -> bool {
        self.conversation_id.ends_with(GROUP_ADDRESS_SUFFIX)
    }

    /// Extract the text of the message, if it carries any.
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(MessageContent::text)
    }
}

/// Message payload kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text sent from a phone.
    Conversation { text: String },
    /// Text with formatting / link preview (web and desktop clients).
    ExtendedText { text: String },
    Image {
        #[serde(default)]
        caption: Option<String>,
    },
    Video {
        #[serde(default)]
        caption: Option<String>,
    },
    Document {
        #[serde(default)]
        caption: Option<String>,
    },
    /// Reply to an interactive buttons message.
    ButtonsResponse { selected_button_id: String },
    /// Reply to an interactive list message.
    ListResponse { selected_row_id: String },
    /// Stickers, audio, reactions, ...
    #[serde(other)]
    Unsupported,
}

impl MessageContent {
    /// Text usable as a conversational turn.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Conversation { text } | Self::ExtendedText { text } => Some(text),
            Self::Image { caption } | Self::Video { caption } | Self::Document { caption } => {
                caption.as_deref()
            }
            Self::ButtonsResponse { selected_button_id } => Some(selected_button_id),
            Self::ListResponse { selected_row_id } => Some(selected_row_id),
            Self::Unsupported => None,
        }
    }
}

// ============================================================================
// Commands (Parley → transport)
// ============================================================================

/// Presence states a transport can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Available,
    Unavailable,
    Composing,
    Paused,
}

/// Commands sent to a transport session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TransportCommand {
    /// Start the session, resuming from stored credentials when present.
    Open {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<serde_json::Value>,
    },
    /// Send a text message. Acknowledged by a `command_result`.
    Send {
        request_id: String,
        address: String,
        text: String,
    },
    /// Announce presence, optionally scoped to one conversation.
    Presence {
        presence: Presence,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    /// Log the account out. Acknowledged by a `command_result`.
    Logout { request_id: String },
    /// Close the session without logging out.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_from_status_codes() {
        assert_eq!(CloseReason::from_status(Some(401), ""), CloseReason::LoggedOut);
        assert_eq!(
            CloseReason::from_status(Some(408), "QR refs attempts ended"),
            CloseReason::ChallengeExpired
        );
        assert_eq!(
            CloseReason::from_status(Some(408), "Connection Lost"),
            CloseReason::ConnectionLost
        );
        assert_eq!(
            CloseReason::from_status(Some(428), ""),
            CloseReason::ConnectionClosed
        );
        assert_eq!(
            CloseReason::from_status(Some(440), ""),
            CloseReason::ConnectionReplaced
        );
        assert_eq!(CloseReason::from_status(Some(500), ""), CloseReason::BadSession);
        assert_eq!(
            CloseReason::from_status(Some(515), ""),
            CloseReason::RestartRequired
        );
        assert_eq!(CloseReason::from_status(Some(403), ""), CloseReason::Unknown);
        assert_eq!(CloseReason::from_status(None, ""), CloseReason::Unknown);
    }

    #[test]
    fn close_info_from_status_keeps_raw_fields() {
        let info = CloseInfo::from_status(Some(408), Some("QR refs attempts ended".to_string()));
        assert_eq!(info.reason, CloseReason::ChallengeExpired);
        assert_eq!(info.status_code, Some(408));
    }

    #[test]
    fn connection_update_event_parses() {
        let line = r#"{"type":"connection_update","data":{"phase":"close","close":{"reason":"logged_out","status_code":401}}}"#;
        let event: TransportEvent = serde_json::from_str(line).unwrap();
        let TransportEvent::ConnectionUpdate(update) = event else {
            panic!("expected connection update");
        };
        assert_eq!(update.phase, Some(ConnectionPhase::Close));
        assert_eq!(update.close.unwrap().reason, CloseReason::LoggedOut);
        assert!(update.challenge.is_none());
    }

    #[test]
    fn unrecognised_close_reason_parses_as_unknown() {
        let info: CloseInfo = serde_json::from_str(r#"{"reason":"multidevice_mismatch"}"#).unwrap();
        assert_eq!(info.reason, CloseReason::Unknown);
    }

    #[test]
    fn message_text_extraction() {
        let caption = MessageContent::Image {
            caption: Some("look".to_string()),
        };
        assert_eq!(caption.text(), Some("look"));

        let bare_image = MessageContent::Image { caption: None };
        assert_eq!(bare_image.text(), None);

        let list = MessageContent::ListResponse {
            selected_row_id: "row-2".to_string(),
        };
        assert_eq!(list.text(), Some("row-2"));
    }

    #[test]
    fn unknown_message_kind_is_unsupported() {
        let line = r#"{"id":"A1","conversation_id":"51999@s.whatsapp.net","content":{"kind":"sticker","url":"x"}}"#;
        let msg: RawMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.content, Some(MessageContent::Unsupported));
        assert_eq!(msg.text(), None);
        assert!(!msg.from_me);
        assert!(!msg.is_group());
    }

    #[test]
    fn send_command_serialises_as_json_line() {
        let cmd = TransportCommand::Send {
            request_id: "r1".to_string(),
            address: "51987654321@s.whatsapp.net".to_string(),
            text: "hola".to_string(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.starts_with(r#"{"type":"send","data":{"#));
        assert!(!json.contains('\n'));
    }
}
