//! Process-wide message counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters shared by the runtime, the reply tasks, and the control plane.
#[derive(Debug)]
pub struct BotStats {
    started_at: DateTime<Utc>,
    received: AtomicU64,
    sent: AtomicU64,
    auto_replies: AtomicU64,
    errors: AtomicU64,
    duplicates: AtomicU64,
    cooldown_drops: AtomicU64,
}

impl Default for BotStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BotStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            auto_replies: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            cooldown_drops: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_reply(&self) {
        self.auto_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cooldown_drop(&self) {
        self.cooldown_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let uptime = Utc::now() - self.started_at;
        StatsSnapshot {
            started_at: self.started_at,
            uptime_seconds: uptime.num_seconds().max(0) as u64,
            messages_received: self.received.load(Ordering::Relaxed),
            messages_sent: self.sent.load(Ordering::Relaxed),
            auto_replies: self.auto_replies.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates.load(Ordering::Relaxed),
            cooldown_drops: self.cooldown_drops.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub auto_replies: u64,
    pub errors: u64,
    pub duplicates_dropped: u64,
    pub cooldown_drops: u64,
}
