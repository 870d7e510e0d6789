//! # lens-queue: at-least-once work queue channel
//!
//! Messages are opaque byte payloads published to named queues. Consumers
//! lease one message at a time; the lease token is required to ack or
//! nack it, and a lease that runs out hands the message back to the queue.
//!
//! - **At-least-once**: an unacknowledged delivery is redelivered once its
//!   lease expires (consumer crash, stalled handler).
//! - **Bounded redelivery**: every message carries `max_deliveries`.
//!   Retryable failures back off exponentially; the last failure, or any
//!   permanent one, moves the message to the queue's dead-letter list.
//! - **No ordering guarantee** between messages.
//!
//! ```rust
//! use std::sync::Arc;
//! use lens_queue::prelude::*;
//! use lens_queue::backend::memory::MemoryBackend;
//!
//! struct Print;
//!
//! #[async_trait]
//! impl MessageHandler for Print {
//!     async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
//!         println!("{:?}", delivery.payload_str());
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> QueueResult<()> {
//! let channel = QueueChannel::connect(MemoryBackend::new(), QueueConfig::default()).await?;
//! channel.declare("photos").await?;
//! channel.publish("photos", "507f1f77bcf86cd799439011").await?;
//!
//! let report = channel.drain("photos", &Print).await?;
//! assert_eq!(report.acked, 1);
//! channel.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod channel;
pub mod error;
pub mod reaper;
pub mod types;

pub use backend::QueueBackend;
pub use channel::{
    ConsumerHandle, DrainReport, MessageHandler, ProcessOutcome, QueueChannel, QueueConfig,
};
pub use error::{HandlerError, QueueError, QueueResult};
pub use reaper::LeaseReaper;
pub use types::{
    Delivery, DeliveryEvent, DeliveryStatus, LeaseToken, MessageId, MessageRecord, NackOutcome,
    QueueCapabilities,
};

pub use backend::memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;

/// Prelude for consumers and publishers
pub mod prelude {
    pub use crate::{
        ConsumerHandle, Delivery, HandlerError, MessageHandler, QueueChannel, QueueConfig,
        QueueError, QueueResult,
    };

    pub use async_trait::async_trait;
}
