//! Inbound message pipeline: filtering, deduplication, aggregation, cooldown.

pub mod aggregator;
pub mod cooldown;
pub mod dedup;
pub mod inbound;

pub use aggregator::{AggregatorConfig, Batch, BufferSnapshot, FlushOutcome, MessageAggregator};
pub use inbound::{IgnoreReason, extract_text};
