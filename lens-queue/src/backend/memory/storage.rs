use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::backend::{check_queue_name, lease_deadline, BoxStream, QueueBackend};
use crate::{
    Delivery, DeliveryEvent, LeaseToken, MessageId, MessageRecord, NackOutcome,
    QueueCapabilities, QueueError, QueueResult,
};

/// Acked records are kept this long for inspection, matching the Redis
/// backend's TTL
pub const DEFAULT_ACKED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// In-memory backend for tests and single-process deployments.
///
/// Lock order is always `records` then `queues` then `dead` then `acked`.
#[derive(Clone)]
pub struct MemoryBackend {
    /// Message records indexed by id
    pub(crate) records: Arc<RwLock<HashMap<MessageId, MessageRecord>>>,

    /// Queue name -> ids of ready and retrying messages
    pub(crate) queues: Arc<RwLock<HashMap<String, VecDeque<MessageId>>>>,

    /// Queue name -> dead-lettered ids, oldest first
    pub(crate) dead: Arc<RwLock<HashMap<String, Vec<MessageId>>>>,

    /// Acked ids in ack order, pruned once older than `acked_retention`
    pub(crate) acked: Arc<RwLock<VecDeque<(DateTime<Utc>, MessageId)>>>,

    acked_retention: Duration,

    pub(crate) event_broadcaster: broadcast::Sender<DeliveryEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);

        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(RwLock::new(HashMap::new())),
            dead: Arc::new(RwLock::new(HashMap::new())),
            acked: Arc::new(RwLock::new(VecDeque::new())),
            acked_retention: DEFAULT_ACKED_RETENTION,
            event_broadcaster,
        }
    }

    pub fn with_acked_retention(mut self, retention: Duration) -> Self {
        self.acked_retention = retention;
        self
    }

    /// Drop acked records older than the retention window
    fn prune_acked(
        &self,
        records: &mut HashMap<MessageId, MessageRecord>,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.acked_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return 0;
        };

        let mut acked = self.acked.write();
        let mut pruned = 0;
        while acked.front().is_some_and(|(at, _)| *at <= cutoff) {
            if let Some((_, id)) = acked.pop_front() {
                records.remove(&id);
                pruned += 1;
            }
        }
        pruned
    }

    /// Force a lease to expire (test helper)
    pub fn force_lease_expiry(&self, id: &MessageId) -> QueueResult<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| QueueError::MessageNotFound(id.to_string()))?;
        if record.status.is_leased() {
            let past = Utc::now() - chrono::Duration::seconds(1);
            record.status = crate::DeliveryStatus::Leased { lease_until: past };
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    fn emit(&self, event: DeliveryEvent) {
        let _ = self.event_broadcaster.send(event);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Move a record that just failed a delivery to its next state. Records
/// out of deliveries, or without a retry time, are dead-lettered.
fn settle_failure(
    record: &mut MessageRecord,
    error: String,
    retry_at: Option<DateTime<Utc>>,
    queues: &mut HashMap<String, VecDeque<MessageId>>,
    dead: &mut HashMap<String, Vec<MessageId>>,
) -> (NackOutcome, DeliveryEvent) {
    let now = Utc::now();
    match retry_at {
        Some(retry_at) if !record.deliveries_exhausted() => {
            record.schedule_retry(retry_at, error.clone());
            queues
                .entry(record.queue.clone())
                .or_default()
                .push_back(record.id.clone());
            (
                NackOutcome::Retrying { retry_at },
                DeliveryEvent::Retrying {
                    id: record.id.clone(),
                    retry_at,
                    error,
                    at: now,
                },
            )
        }
        _ => {
            record.dead_letter(error.clone());
            dead.entry(record.queue.clone())
                .or_default()
                .push(record.id.clone());
            (
                NackOutcome::DeadLettered,
                DeliveryEvent::DeadLettered {
                    id: record.id.clone(),
                    reason: error,
                    at: now,
                },
            )
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn declare(&self, queue: &str) -> QueueResult<()> {
        check_queue_name(queue)?;
        self.queues.write().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        max_deliveries: u32,
    ) -> QueueResult<MessageId> {
        check_queue_name(queue)?;
        let record = MessageRecord::new(queue, payload, max_deliveries);
        let id = record.id.clone();
        let at = record.created_at;

        {
            let mut records = self.records.write();
            let mut queues = self.queues.write();
            records.insert(id.clone(), record);
            queues.entry(queue.to_string()).or_default().push_back(id.clone());
        }

        self.emit(DeliveryEvent::Published {
            id: id.clone(),
            queue: queue.to_string(),
            at,
        });
        Ok(id)
    }

    async fn receive(&self, queue: &str, lease: Duration) -> QueueResult<Option<Delivery>> {
        let now = Utc::now();

        let delivery = {
            let mut records = self.records.write();
            let mut queues = self.queues.write();
            let Some(ready) = queues.get_mut(queue) else {
                return Ok(None);
            };

            let position = ready.iter().position(|id| {
                records
                    .get(id)
                    .map(|r| r.status.is_eligible(now))
                    .unwrap_or(false)
            });
            let Some(id) = position.and_then(|p| ready.remove(p)) else {
                return Ok(None);
            };
            let record = records
                .get_mut(&id)
                .ok_or_else(|| QueueError::Internal(format!("queued id {id} has no record")))?;

            let lease_until = lease_deadline(now, lease);
            let lease_token = record.start_lease(lease_until);
            Delivery {
                record: record.clone(),
                lease_token,
                lease_until,
            }
        };

        self.emit(DeliveryEvent::Leased {
            id: delivery.record.id.clone(),
            attempt: delivery.record.attempts,
            lease_until: delivery.lease_until,
            at: now,
        });
        Ok(Some(delivery))
    }

    async fn ack(&self, id: &MessageId, token: &LeaseToken) -> QueueResult<()> {
        let now = Utc::now();
        {
            let mut records = self.records.write();
            let record = records
                .get_mut(id)
                .ok_or_else(|| QueueError::MessageNotFound(id.to_string()))?;
            record.verify_lease(token, now)?;
            record.ack();
            self.acked.write().push_back((now, id.clone()));
            self.prune_acked(&mut records, now);
        }

        self.emit(DeliveryEvent::Acked {
            id: id.clone(),
            at: now,
        });
        Ok(())
    }

    async fn nack(
        &self,
        id: &MessageId,
        token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<NackOutcome> {
        let now = Utc::now();
        let (outcome, event) = {
            let mut records = self.records.write();
            let record = records
                .get_mut(id)
                .ok_or_else(|| QueueError::MessageNotFound(id.to_string()))?;
            record.verify_lease(token, now)?;

            let mut queues = self.queues.write();
            let mut dead = self.dead.write();
            settle_failure(record, error, retry_at, &mut queues, &mut dead)
        };

        self.emit(event);
        Ok(outcome)
    }

    async fn reclaim_expired(&self) -> QueueResult<usize> {
        let now = Utc::now();
        let events = {
            let mut records = self.records.write();
            let pruned = self.prune_acked(&mut records, now);
            if pruned > 0 {
                debug!(pruned, "Pruned acked records");
            }
            let mut queues = self.queues.write();
            let mut dead = self.dead.write();

            records
                .values_mut()
                .filter(|record| record.lease_expired(now))
                .map(|record| {
                    let (_, event) = settle_failure(
                        record,
                        "Lease expired".to_string(),
                        Some(now),
                        &mut queues,
                        &mut dead,
                    );
                    event
                })
                .collect::<Vec<_>>()
        };

        let reclaimed = events.len();
        for event in events {
            self.emit(event);
        }
        Ok(reclaimed)
    }

    async fn dead_letters(&self, queue: &str) -> QueueResult<Vec<MessageRecord>> {
        let records = self.records.read();
        let dead = self.dead.read();
        Ok(dead
            .get(queue)
            .map(|ids| ids.iter().filter_map(|id| records.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn pending(&self, queue: &str) -> QueueResult<usize> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.queue == queue && !r.status.is_terminal())
            .count())
    }

    async fn get_record(&self, id: &MessageId) -> QueueResult<MessageRecord> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::MessageNotFound(id.to_string()))
    }

    fn event_stream(&self) -> BoxStream<DeliveryEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};

        let receiver = self.event_broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::in_process()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeliveryStatus;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn receive_skips_future_retries() {
        let backend = MemoryBackend::new();
        let first = backend.publish("photos", b"a".to_vec(), 3).await.unwrap();
        let second = backend.publish("photos", b"b".to_vec(), 3).await.unwrap();

        let leased = backend.receive("photos", LEASE).await.unwrap().unwrap();
        assert_eq!(leased.id(), &first);
        let later = Utc::now() + chrono::Duration::seconds(60);
        backend
            .nack(&first, &leased.lease_token, "busy".into(), Some(later))
            .await
            .unwrap();

        let next = backend.receive("photos", LEASE).await.unwrap().unwrap();
        assert_eq!(next.id(), &second);
        assert!(backend.receive("photos", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reclaim_requeues_then_dead_letters() {
        let backend = MemoryBackend::new();
        let id = backend.publish("photos", b"a".to_vec(), 2).await.unwrap();

        backend.receive("photos", LEASE).await.unwrap().unwrap();
        backend.force_lease_expiry(&id).unwrap();
        assert_eq!(backend.reclaim_expired().await.unwrap(), 1);
        assert!(matches!(
            backend.get_record(&id).await.unwrap().status,
            DeliveryStatus::Retrying { .. }
        ));

        let again = backend.receive("photos", LEASE).await.unwrap().unwrap();
        assert_eq!(again.attempt(), 2);
        backend.force_lease_expiry(&id).unwrap();
        assert_eq!(backend.reclaim_expired().await.unwrap(), 1);

        let dead = backend.dead_letters("photos").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("Lease expired"));
        assert_eq!(backend.pending("photos").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unexpired_leases_are_left_alone() {
        let backend = MemoryBackend::new();
        backend.publish("photos", b"a".to_vec(), 2).await.unwrap();
        backend.receive("photos", LEASE).await.unwrap().unwrap();
        assert_eq!(backend.reclaim_expired().await.unwrap(), 0);
        assert_eq!(backend.pending("photos").await.unwrap(), 1);
    }

    async fn publish_and_ack(backend: &MemoryBackend, count: usize) -> Vec<MessageId> {
        let mut ids = Vec::new();
        for i in 0..count {
            let id = backend.publish("photos", vec![i as u8], 3).await.unwrap();
            let delivery = backend.receive("photos", LEASE).await.unwrap().unwrap();
            backend.ack(&id, &delivery.lease_token).await.unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn acked_records_are_pruned_after_retention() {
        let backend = MemoryBackend::new().with_acked_retention(Duration::ZERO);
        let ids = publish_and_ack(&backend, 100).await;

        assert!(backend.records.read().is_empty());
        assert!(backend.acked.read().is_empty());
        assert!(matches!(
            backend.get_record(&ids[0]).await,
            Err(QueueError::MessageNotFound(_))
        ));
        assert_eq!(backend.pending("photos").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn acked_records_stay_inspectable_within_retention() {
        let backend = MemoryBackend::new();
        let ids = publish_and_ack(&backend, 3).await;

        assert_eq!(backend.records.read().len(), 3);
        assert_eq!(backend.reclaim_expired().await.unwrap(), 0);
        assert!(matches!(
            backend.get_record(&ids[2]).await.unwrap().status,
            DeliveryStatus::Acked { .. }
        ));
    }

    #[tokio::test]
    async fn pruning_leaves_unacked_records() {
        let backend = MemoryBackend::new().with_acked_retention(Duration::ZERO);
        let waiting = backend.publish("photos", b"later".to_vec(), 3).await.unwrap();
        let first = backend.receive("photos", LEASE).await.unwrap().unwrap();
        backend.publish("photos", b"now".to_vec(), 3).await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(60);
        backend
            .nack(&waiting, &first.lease_token, "busy".into(), Some(later))
            .await
            .unwrap();

        let second = backend.receive("photos", LEASE).await.unwrap().unwrap();
        backend.ack(second.id(), &second.lease_token).await.unwrap();

        assert_eq!(backend.records.read().len(), 1);
        assert!(backend.get_record(&waiting).await.is_ok());
        assert_eq!(backend.pending("photos").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_queue_names_are_rejected() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.declare("").await,
            Err(QueueError::InvalidQueueName(_))
        ));
        assert!(matches!(
            backend.publish("a b", Vec::new(), 1).await,
            Err(QueueError::InvalidQueueName(_))
        ));
        backend.declare("photos").await.unwrap();
        backend.declare("photos").await.unwrap();
    }
}
