//! Inbound message filtering.

use std::fmt;

use parley_transport_protocol::{MessageContent, RawMessage};

/// Why an inbound message produced no conversational text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Echo of a message this account sent.
    FromSelf,
    /// Protocol or stub message without a payload.
    NoContent,
    /// Payload kind that carries no text (stickers, audio, ...).
    Unsupported,
    /// Text present but blank.
    Blank,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FromSelf => "from_self",
            Self::NoContent => "no_content",
            Self::Unsupported => "unsupported",
            Self::Blank => "blank",
        })
    }
}

/// Extract the trimmed text of an inbound message worth replying to.
pub fn extract_text(message: &RawMessage) -> Result<String, IgnoreReason> {
    if message.from_me {
        return Err(IgnoreReason::FromSelf);
    }
    let content = message.content.as_ref().ok_or(IgnoreReason::NoContent)?;
    if matches!(content, MessageContent::Unsupported) {
        return Err(IgnoreReason::Unsupported);
    }

    let text = content.text().map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(IgnoreReason::Blank);
    }
    Ok(text.to_string())
}
