//! Bounded set of already-seen message ids.

use std::collections::{HashSet, VecDeque};

/// Default number of ids remembered before eviction kicks in.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Remembers message ids so redelivered messages are processed once.
///
/// When full, the oldest half is evicted in insertion order.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Record `id`, evicting the oldest half first when full.
    pub fn mark_seen(&mut self, id: &str) {
        if self.seen.contains(id) {
            return;
        }

        if self.seen.len() >= self.capacity {
            self.evict(self.capacity / 2);
        }

        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
    }

    /// Record `id`. Returns `true` if it had already been seen.
    pub fn check_and_mark(&mut self, id: &str) -> bool {
        if self.seen(id) {
            return true;
        }
        self.mark_seen(id);
        false
    }

    fn evict(&mut self, count: usize) {
        for id in self.order.drain(..count.min(self.order.len())) {
            self.seen.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}
