//! Redis Streams transport.
//!
//! This crate provides:
//! - Publishing with an idempotency key (duplicate-publish guard)
//! - Batch consumption through consumer groups
//! - Acknowledgement, claim of idle pending entries, retry counters
//! - Dead-letter stream for entries that keep failing

pub mod error;
pub mod stream;

pub use error::{QueueError, QueueResult};
pub use stream::{PublishOutcome, StreamConfig, StreamEntry, StreamQueue, BODY_FIELD};
