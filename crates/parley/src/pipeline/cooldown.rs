//! Per-conversation reply cooldown.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Cooldown records older than this are dropped by [`CooldownGate::sweep`].
pub const RETENTION: Duration = Duration::from_secs(60 * 60);

/// Tracks when each conversation last got a reply.
#[derive(Debug, Default)]
pub struct CooldownGate {
    cooldown: Duration,
    last_reply: HashMap<String, Instant>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_reply: HashMap::new(),
        }
    }

    /// Whether a reply to `conversation_id` is allowed at `now`.
    pub fn admit(&self, conversation_id: &str, now: Instant) -> bool {
        self.remaining(conversation_id, now).is_none()
    }

    /// Time left before `conversation_id` may get another reply.
    pub fn remaining(&self, conversation_id: &str, now: Instant) -> Option<Duration> {
        let last = self.last_reply.get(conversation_id)?;
        let elapsed = now.saturating_duration_since(*last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    pub fn record(&mut self, conversation_id: &str, now: Instant) {
        self.last_reply.insert(conversation_id.to_string(), now);
    }

    /// Drop records older than [`RETENTION`]. Returns how many were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.last_reply.len();
        self.last_reply
            .retain(|_, last| now.saturating_duration_since(*last) <= RETENTION);
        before - self.last_reply.len()
    }

    pub fn len(&self) -> usize {
        self.last_reply.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_reply.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_reply.clear();
    }
}
