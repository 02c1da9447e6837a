//! Per-conversation message aggregation.
//!
//! Messages that arrive in quick succession are buffered per conversation and
//! flushed as a single batch once the conversation goes quiet for the debounce
//! interval (sliding: every message pushes the deadline back), or as soon as
//! the buffer reaches the maximum batch size.
//!
//! Debounce timers live in a [`DelayQueue`]; each buffer keeps the key of its
//! one live timer so re-arming removes the previous timer first.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parley_transport_protocol::RawMessage;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

use super::cooldown::CooldownGate;
use super::dedup::{self, DedupCache};

/// Aggregation settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Quiet period after the latest message before a buffer flushes.
    pub debounce: Duration,
    /// Buffer size that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Minimum time between replies to the same conversation. Zero disables it.
    pub cooldown: Duration,
    /// Number of message ids remembered for deduplication.
    pub dedup_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(3000),
            max_batch_size: 5,
            cooldown: Duration::ZERO,
            dedup_capacity: dedup::DEFAULT_CAPACITY,
        }
    }
}

/// Preview length for monitoring snapshots.
const PREVIEW_CHARS: usize = 50;

struct ConversationBuffer {
    messages: Vec<String>,
    first_at: Instant,
    first_at_wall: DateTime<Utc>,
    last_at: Instant,
    origin: RawMessage,
    timer: Option<(Key, Instant)>,
}

/// Aggregated text ready for a reply.
#[derive(Debug, Clone)]
pub struct Batch {
    pub conversation_id: String,
    /// Buffered texts joined with single spaces, in arrival order.
    pub text: String,
    pub message_count: usize,
    /// The message that opened the buffer.
    pub origin: RawMessage,
    /// Time between the first and the last buffered message.
    pub span: Duration,
}

/// Result of flushing a conversation buffer.
#[derive(Debug)]
pub enum FlushOutcome {
    Ready(Batch),
    /// The conversation was replied to recently; the buffered text is dropped.
    CoolingDown {
        conversation_id: String,
        dropped: usize,
        remaining: Duration,
    },
    /// Nothing was buffered.
    Empty,
}

/// Monitoring view of one pending buffer.
#[derive(Debug, Clone, Serialize)]
pub struct BufferSnapshot {
    pub conversation_id: String,
    pub message_count: usize,
    pub first_message_at: DateTime<Utc>,
    pub waiting_ms: u64,
    /// Time until the debounce timer fires, if armed.
    pub flush_in_ms: Option<u64>,
    pub previews: Vec<String>,
}

pub struct MessageAggregator {
    config: AggregatorConfig,
    buffers: HashMap<String, ConversationBuffer>,
    timers: DelayQueue<String>,
    cooldown: CooldownGate,
    dedup: DedupCache,
}

impl MessageAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            cooldown: CooldownGate::new(config.cooldown),
            dedup: DedupCache::new(config.dedup_capacity),
            buffers: HashMap::new(),
            timers: DelayQueue::new(),
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Mark a message id as seen. Returns `false` for a duplicate.
    pub fn accept(&mut self, message_id: &str) -> bool {
        !self.dedup.check_and_mark(message_id)
    }

    /// Buffer `text` for the origin's conversation.
    ///
    /// Returns a flush outcome when the buffer hit the maximum batch size;
    /// otherwise (re)arms the conversation's debounce timer.
    pub fn on_message(
        &mut self,
        origin: &RawMessage,
        text: String,
        now: Instant,
    ) -> Option<FlushOutcome> {
        let conversation_id = origin.conversation_id.as_str();

        let full = {
            let buffer = self
                .buffers
                .entry(conversation_id.to_string())
                .or_insert_with(|| ConversationBuffer {
                    messages: Vec::new(),
                    first_at: now,
                    first_at_wall: Utc::now(),
                    last_at: now,
                    origin: origin.clone(),
                    timer: None,
                });
            buffer.messages.push(text);
            buffer.last_at = now;
            if let Some((key, _)) = buffer.timer.take() {
                self.timers.try_remove(&key);
            }
            buffer.messages.len() >= self.config.max_batch_size
        };

        if full {
            return Some(self.flush(conversation_id, now));
        }

        let key = self
            .timers
            .insert(conversation_id.to_string(), self.config.debounce);
        if let Some(buffer) = self.buffers.get_mut(conversation_id) {
            buffer.timer = Some((key, now + self.config.debounce));
        }
        None
    }

    /// Wait for the next debounce timer and return its conversation id.
    ///
    /// Resolves to `None` immediately when no timer is armed, so callers in a
    /// `select!` loop should guard on [`Self::has_pending_timers`].
    pub async fn next_due(&mut self) -> Option<String> {
        let expired = self.timers.next().await?;
        let conversation_id = expired.into_inner();
        if let Some(buffer) = self.buffers.get_mut(&conversation_id) {
            buffer.timer = None;
        }
        Some(conversation_id)
    }

    /// Drain a conversation's buffer.
    pub fn flush(&mut self, conversation_id: &str, now: Instant) -> FlushOutcome {
        let Some(buffer) = self.buffers.remove(conversation_id) else {
            return FlushOutcome::Empty;
        };
        if let Some((key, _)) = buffer.timer {
            self.timers.try_remove(&key);
        }
        if buffer.messages.is_empty() {
            return FlushOutcome::Empty;
        }

        if let Some(remaining) = self.cooldown.remaining(conversation_id, now) {
            return FlushOutcome::CoolingDown {
                conversation_id: conversation_id.to_string(),
                dropped: buffer.messages.len(),
                remaining,
            };
        }

        FlushOutcome::Ready(Batch {
            conversation_id: conversation_id.to_string(),
            text: buffer.messages.join(" "),
            message_count: buffer.messages.len(),
            span: buffer.last_at.saturating_duration_since(buffer.first_at),
            origin: buffer.origin,
        })
    }

    /// Start the cooldown for a conversation that just got a reply.
    pub fn record_reply(&mut self, conversation_id: &str, now: Instant) {
        self.cooldown.record(conversation_id, now);
        self.cooldown.sweep(now);
    }

    /// Drop stale cooldown records. Returns how many were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.cooldown.sweep(now)
    }

    /// Forget all buffers, timers, cooldowns, and seen ids.
    ///
    /// Returns the number of buffers discarded.
    pub fn reset(&mut self) -> usize {
        let dropped = self.buffers.len();
        self.buffers.clear();
        self.timers.clear();
        self.cooldown.clear();
        self.dedup.clear();
        dropped
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn pending_conversations(&self) -> usize {
        self.buffers.len()
    }

    pub fn tracked_cooldowns(&self) -> usize {
        self.cooldown.len()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<BufferSnapshot> {
        let mut buffers: Vec<_> = self
            .buffers
            .iter()
            .map(|(conversation_id, buffer)| BufferSnapshot {
                conversation_id: conversation_id.clone(),
                message_count: buffer.messages.len(),
                first_message_at: buffer.first_at_wall,
                waiting_ms: now.saturating_duration_since(buffer.first_at).as_millis() as u64,
                flush_in_ms: buffer
                    .timer
                    .as_ref()
                    .map(|(_, deadline)| deadline.saturating_duration_since(now).as_millis() as u64),
                previews: buffer
                    .messages
                    .iter()
                    .map(|text| preview(text))
                    .collect(),
            })
            .collect();
        buffers.sort_by(|a, b| b.waiting_ms.cmp(&a.waiting_ms));
        buffers
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut short: String = text.chars().take(PREVIEW_CHARS).collect();
    short.push_str("...");
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_transport_protocol::MessageContent;
    use tokio::time::sleep;

    const CONV: &str = "51987654321@s.whatsapp.net";

    fn origin(conversation_id: &str) -> RawMessage {
        RawMessage {
            id: ulid::Ulid::new().to_string(),
            conversation_id: conversation_id.to_string(),
            from_me: false,
            push_name: Some("Ana".to_string()),
            timestamp: None,
            content: Some(MessageContent::Conversation {
                text: String::new(),
            }),
        }
    }

    fn aggregator() -> MessageAggregator {
        MessageAggregator::new(AggregatorConfig {
            cooldown: Duration::from_secs(60),
            ..AggregatorConfig::default()
        })
    }

    fn expect_ready(outcome: FlushOutcome) -> Batch {
        match outcome {
            FlushOutcome::Ready(batch) => batch,
            other => panic!("expected ready batch, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn messages_within_debounce_flush_once() {
        let mut agg = aggregator();
        let start = Instant::now();

        assert!(agg.on_message(&origin(CONV), "hola".into(), Instant::now()).is_none());
        sleep(Duration::from_millis(500)).await;
        assert!(agg.on_message(&origin(CONV), "necesito ayuda".into(), Instant::now()).is_none());

        let due = agg.next_due().await.unwrap();
        assert_eq!(due, CONV);
        assert!(Instant::now() - start >= Duration::from_millis(3500));

        let batch = expect_ready(agg.flush(&due, Instant::now()));
        assert_eq!(batch.text, "hola necesito ayuda");
        assert_eq!(batch.message_count, 2);
        assert_eq!(batch.span, Duration::from_millis(500));
        assert!(!agg.has_pending_timers());
        assert_eq!(agg.pending_conversations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_slides_with_each_message() {
        let mut agg = aggregator();
        let start = Instant::now();

        agg.on_message(&origin(CONV), "a".into(), Instant::now());
        sleep(Duration::from_millis(2000)).await;
        agg.on_message(&origin(CONV), "b".into(), Instant::now());

        agg.next_due().await.unwrap();
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_millis(5000));
        assert!(waited < Duration::from_millis(5100));
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_flushes_immediately() {
        let mut agg = aggregator();
        let now = Instant::now();
        for i in 1..5 {
            assert!(agg.on_message(&origin(CONV), format!("m{i}"), now).is_none());
        }

        let outcome = agg.on_message(&origin(CONV), "m5".into(), now).unwrap();
        let batch = expect_ready(outcome);
        assert_eq!(batch.message_count, 5);
        assert_eq!(batch.text, "m1 m2 m3 m4 m5");
        assert!(!agg.has_pending_timers());
    }

    #[tokio::test(start_paused = true)]
    async fn conversations_are_independent() {
        let mut agg = aggregator();
        let other = "51911122233@s.whatsapp.net";

        agg.on_message(&origin(CONV), "first".into(), Instant::now());
        sleep(Duration::from_millis(1000)).await;
        agg.on_message(&origin(other), "second".into(), Instant::now());

        assert_eq!(agg.next_due().await.unwrap(), CONV);
        let batch = expect_ready(agg.flush(CONV, Instant::now()));
        assert_eq!(batch.text, "first");
        assert_eq!(agg.pending_conversations(), 1);

        assert_eq!(agg.next_due().await.unwrap(), other);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_drops_buffer() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.record_reply(CONV, t0);

        sleep(Duration::from_secs(30)).await;
        agg.on_message(&origin(CONV), "otra vez".into(), Instant::now());
        match agg.flush(CONV, Instant::now()) {
            FlushOutcome::CoolingDown {
                dropped, remaining, ..
            } => {
                assert_eq!(dropped, 1);
                assert_eq!(remaining, Duration::from_secs(30));
            }
            other => panic!("expected cooldown drop, got {other:?}"),
        }
        assert_eq!(agg.pending_conversations(), 0);

        sleep(Duration::from_secs(31)).await;
        agg.on_message(&origin(CONV), "ahora si".into(), Instant::now());
        let batch = expect_ready(agg.flush(CONV, Instant::now()));
        assert_eq!(batch.text, "ahora si");
    }

    #[tokio::test(start_paused = true)]
    async fn default_cooldown_never_drops() {
        let mut agg = MessageAggregator::new(AggregatorConfig::default());
        agg.record_reply(CONV, Instant::now());

        agg.on_message(&origin(CONV), "enseguida".into(), Instant::now());
        let batch = expect_ready(agg.flush(CONV, Instant::now()));
        assert_eq!(batch.text, "enseguida");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_without_buffer_is_noop() {
        let mut agg = aggregator();
        assert!(matches!(
            agg.flush(CONV, Instant::now()),
            FlushOutcome::Empty
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_everything() {
        let mut agg = aggregator();
        assert!(agg.accept("m1"));
        agg.on_message(&origin(CONV), "hola".into(), Instant::now());
        agg.record_reply("other", Instant::now());

        assert_eq!(agg.reset(), 1);
        assert!(!agg.has_pending_timers());
        assert_eq!(agg.pending_conversations(), 0);
        assert_eq!(agg.tracked_cooldowns(), 0);
        assert!(agg.accept("m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ids_rejected() {
        let mut agg = aggregator();
        assert!(agg.accept("m1"));
        assert!(!agg.accept("m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_lists_pending_buffers() {
        let mut agg = aggregator();
        agg.on_message(&origin(CONV), "hola".into(), Instant::now());
        sleep(Duration::from_millis(1200)).await;

        let snapshot = agg.snapshot(Instant::now());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].conversation_id, CONV);
        assert_eq!(snapshot[0].message_count, 1);
        assert_eq!(snapshot[0].previews, vec!["hola".to_string()]);
        assert!(snapshot[0].waiting_ms >= 1200);
        assert!(snapshot[0].flush_in_ms.unwrap() <= 1800);
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(80);
        let short = preview(&long);
        assert_eq!(short.chars().count(), PREVIEW_CHARS + 3);
        assert!(short.ends_with("..."));
        assert_eq!(preview("corto"), "corto");
    }
}
