pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::{
    Delivery, DeliveryEvent, LeaseToken, MessageId, MessageRecord, NackOutcome,
    QueueCapabilities, QueueResult,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Backend trait for queue storage primitives. Retry policy lives in the
/// channel; backends only record what they are told.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Make sure a queue exists. Idempotent.
    async fn declare(&self, queue: &str) -> QueueResult<()>;

    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        max_deliveries: u32,
    ) -> QueueResult<MessageId>;

    /// Lease the next eligible message, if any
    async fn receive(&self, queue: &str, lease: Duration) -> QueueResult<Option<Delivery>>;

    /// Acknowledge a delivery (lease token required)
    async fn ack(&self, id: &MessageId, token: &LeaseToken) -> QueueResult<()>;

    /// Reject a delivery. `retry_at = None`, or an exhausted delivery
    /// budget, dead-letters the message.
    async fn nack(
        &self,
        id: &MessageId,
        token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<NackOutcome>;

    /// Return expired leases to their queue (or the dead-letter list when
    /// out of deliveries). Returns how many were reclaimed.
    async fn reclaim_expired(&self) -> QueueResult<usize>;

    async fn dead_letters(&self, queue: &str) -> QueueResult<Vec<MessageRecord>>;

    /// Messages not yet in a terminal state
    async fn pending(&self, queue: &str) -> QueueResult<usize>;

    async fn get_record(&self, id: &MessageId) -> QueueResult<MessageRecord>;

    /// Event stream for observability (boxed for stable Rust)
    fn event_stream(&self) -> BoxStream<DeliveryEvent>;

    fn capabilities(&self) -> QueueCapabilities;
}

/// Queue names end up in storage keys
pub(crate) fn check_queue_name(queue: &str) -> QueueResult<()> {
    let valid = !queue.is_empty()
        && queue
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(crate::QueueError::InvalidQueueName(queue.to_string()))
    }
}

pub(crate) fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(300))
}
