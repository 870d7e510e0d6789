use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BoxStream, QueueBackend};
use crate::reaper::{LeaseReaper, ReaperHandle};
use crate::{
    Delivery, DeliveryEvent, HandlerError, MessageId, MessageRecord, NackOutcome, QueueError,
    QueueResult,
};

/// Configuration for a queue channel
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a consumer holds a delivery before it is redelivered
    pub lease_duration: Duration,
    /// Deliveries per message before it is dead-lettered
    pub max_deliveries: u32,
    /// Base retry backoff duration
    pub base_retry_backoff: Duration,
    /// Maximum retry backoff duration
    pub max_retry_backoff: Duration,
    /// Consumer sleep when the queue is empty
    pub poll_interval: Duration,
    /// Lease reaper tick
    pub reaper_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(300),
            max_deliveries: 5,
            base_retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(100),
            reaper_interval: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Retries become eligible immediately (tests, inline drains)
    pub fn without_backoff(mut self) -> Self {
        self.base_retry_backoff = Duration::ZERO;
        self.max_retry_backoff = Duration::ZERO;
        self
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    /// Exponential backoff for the retry after delivery `attempt`, capped
    /// at `max_retry_backoff`, with up to 10% jitter.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_retry_backoff.as_millis() as u64;
        let max = self.max_retry_backoff.as_millis() as u64;
        let exp = attempt.saturating_sub(1).min(32);
        let backoff = base.saturating_mul(1u64 << exp).min(max);
        let jitter = if backoff >= 10 {
            rand::thread_rng().gen_range(0..=backoff / 10)
        } else {
            0
        };
        Duration::from_millis(backoff + jitter)
    }
}

/// Consumer callback. `Ok` acks; the error variant picks retry or dead
/// letter.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Acked,
    Retrying { retry_at: DateTime<Utc> },
    DeadLettered,
}

/// Tally from [`QueueChannel::drain`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl DrainReport {
    pub fn deliveries(&self) -> usize {
        self.acked + self.retried + self.dead_lettered
    }
}

/// Handle for a running consumer loop
pub struct ConsumerHandle {
    queue: String,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<QueueResult<()>>,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Stop the loop after its current poll. An in-flight delivery that is
    /// cut off is redelivered once its lease expires.
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Consumer join error: {}", e)))?
    }
}

/// Process-wide queue channel: connected once at startup, shared by
/// clone, shut down explicitly.
#[derive(Clone)]
pub struct QueueChannel {
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
    reaper: Arc<Mutex<Option<ReaperHandle>>>,
    closed: Arc<AtomicBool>,
}

impl QueueChannel {
    /// Wrap a backend and start its lease reaper
    pub async fn connect<B: QueueBackend + 'static>(
        backend: B,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        Self::connect_shared(Arc::new(backend), config).await
    }

    pub async fn connect_shared(
        backend: Arc<dyn QueueBackend>,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        let reaper = LeaseReaper::with_interval(backend.clone(), config.reaper_interval).spawn();
        info!(
            capabilities = ?backend.capabilities(),
            max_deliveries = config.max_deliveries,
            "Queue channel connected"
        );

        Ok(Self {
            backend,
            config,
            reaper: Arc::new(Mutex::new(Some(reaper))),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub async fn declare(&self, queue: &str) -> QueueResult<()> {
        self.ensure_open()?;
        self.backend.declare(queue).await
    }

    #[instrument(skip_all, fields(queue = %queue))]
    pub async fn publish(&self, queue: &str, payload: impl Into<Vec<u8>>) -> QueueResult<MessageId> {
        self.ensure_open()?;
        let id = self
            .backend
            .publish(queue, payload.into(), self.config.max_deliveries)
            .await?;
        debug!(message_id = %id, "Published message");
        Ok(id)
    }

    /// Spawn a consumer loop on `queue`
    pub async fn consume<H>(&self, queue: &str, handler: Arc<H>) -> QueueResult<ConsumerHandle>
    where
        H: MessageHandler + ?Sized + 'static,
    {
        self.ensure_open()?;
        self.backend.declare(queue).await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let consumer = Consumer {
            channel: self.clone(),
            queue: queue.to_string(),
            handler,
            shutdown_rx,
        };
        let join_handle = tokio::spawn(consumer.run());

        info!("Started consumer for queue: {}", queue);
        Ok(ConsumerHandle {
            queue: queue.to_string(),
            shutdown_tx,
            join_handle,
        })
    }

    /// Lease and handle one message. `None` when nothing is deliverable.
    pub async fn process_next<H>(&self, queue: &str, handler: &H) -> QueueResult<Option<ProcessOutcome>>
    where
        H: MessageHandler + ?Sized,
    {
        self.ensure_open()?;
        let delivery = match self.backend.receive(queue, self.config.lease_duration).await? {
            Some(delivery) => delivery,
            None => return Ok(None),
        };

        let id = delivery.id().clone();
        debug!(message_id = %id, attempt = delivery.attempt(), "Delivering message");

        match handler.handle(&delivery).await {
            Ok(()) => {
                self.backend.ack(&id, &delivery.lease_token).await?;
                debug!(message_id = %id, "Message acknowledged");
                Ok(Some(ProcessOutcome::Acked))
            }
            Err(handler_error) => {
                let retry_at = if handler_error.is_retryable() && !delivery.is_last_attempt() {
                    Some(self.retry_time(delivery.attempt()))
                } else {
                    None
                };

                let outcome = self
                    .backend
                    .nack(&id, &delivery.lease_token, handler_error.to_string(), retry_at)
                    .await?;

                match outcome {
                    NackOutcome::Retrying { retry_at } => {
                        warn!(message_id = %id, attempt = delivery.attempt(), "Message failed, will retry: {}", handler_error);
                        Ok(Some(ProcessOutcome::Retrying { retry_at }))
                    }
                    NackOutcome::DeadLettered => {
                        error!(message_id = %id, attempt = delivery.attempt(), "Message dead-lettered: {}", handler_error);
                        Ok(Some(ProcessOutcome::DeadLettered))
                    }
                }
            }
        }
    }

    /// Handle every currently deliverable message inline. Retries that
    /// become eligible while draining are handled too.
    pub async fn drain<H>(&self, queue: &str, handler: &H) -> QueueResult<DrainReport>
    where
        H: MessageHandler + ?Sized,
    {
        let mut report = DrainReport::default();
        while let Some(outcome) = self.process_next(queue, handler).await? {
            match outcome {
                ProcessOutcome::Acked => report.acked += 1,
                ProcessOutcome::Retrying { .. } => report.retried += 1,
                ProcessOutcome::DeadLettered => report.dead_lettered += 1,
            }
        }
        Ok(report)
    }

    pub async fn dead_letters(&self, queue: &str) -> QueueResult<Vec<MessageRecord>> {
        self.backend.dead_letters(queue).await
    }

    pub async fn pending(&self, queue: &str) -> QueueResult<usize> {
        self.backend.pending(queue).await
    }

    pub async fn get_record(&self, id: &MessageId) -> QueueResult<MessageRecord> {
        self.backend.get_record(id).await
    }

    pub fn events(&self) -> BoxStream<DeliveryEvent> {
        self.backend.event_stream()
    }

    /// Stop the reaper and refuse further work. Consumer loops notice on
    /// their next poll.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }
        info!("Queue channel shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    fn retry_time(&self, attempt: u32) -> DateTime<Utc> {
        let backoff = self.config.retry_backoff(attempt);
        Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// Consumer loop for one queue
struct Consumer<H: ?Sized> {
    channel: QueueChannel,
    queue: String,
    handler: Arc<H>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl<H: MessageHandler + ?Sized + 'static> Consumer<H> {
    async fn run(mut self) -> QueueResult<()> {
        let poll_interval = self.channel.config.poll_interval;
        info!("Consumer started for queue: {}", self.queue);

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    info!("Consumer shutdown requested");
                    break;
                }

                result = self.channel.process_next(&self.queue, self.handler.as_ref()) => {
                    match result {
                        Ok(Some(_)) => {}
                        Ok(None) => tokio::time::sleep(poll_interval).await,
                        Err(QueueError::Shutdown) => {
                            info!("Queue channel closed, consumer exiting");
                            break;
                        }
                        Err(e) if e.is_transient() => {
                            warn!("Error processing message: {}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        Err(e) => {
                            error!("Error processing message: {}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("Consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = QueueConfig {
            base_retry_backoff: Duration::from_millis(5),
            max_retry_backoff: Duration::from_millis(9),
            ..QueueConfig::default()
        };
        assert_eq!(config.retry_backoff(1), Duration::from_millis(5));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(9));
        assert_eq!(config.retry_backoff(40), Duration::from_millis(9));
    }

    #[test]
    fn backoff_jitter_is_bounded() {
        let config = QueueConfig {
            base_retry_backoff: Duration::from_millis(1000),
            max_retry_backoff: Duration::from_secs(60),
            ..QueueConfig::default()
        };
        for _ in 0..20 {
            let backoff = config.retry_backoff(3);
            assert!(backoff >= Duration::from_millis(4000));
            assert!(backoff <= Duration::from_millis(4400));
        }
    }

    #[test]
    fn zero_backoff_means_immediate() {
        let config = QueueConfig::default().without_backoff();
        assert_eq!(config.retry_backoff(4), Duration::ZERO);
    }
}
