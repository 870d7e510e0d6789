use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::backend::{check_queue_name, lease_deadline, BoxStream, QueueBackend};
use crate::{
    Delivery, DeliveryEvent, LeaseToken, MessageId, MessageRecord, NackOutcome,
    QueueCapabilities, QueueError, QueueResult,
};

/// Pop the oldest ready id and record its lease deadline in one step, so a
/// consumer crash between the two cannot lose the message.
const LEASE_SCRIPT: &str = r"
local id = redis.call('RPOP', KEYS[1])
if not id then return false end
redis.call('ZADD', KEYS[2], ARGV[1], id)
return id
";

/// Move retries whose time has come back onto the ready list
const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('LPUSH', KEYS[2], id)
end
return #due
";

/// Acked records are kept this long for inspection
const ACKED_TTL_SECS: u64 = 24 * 60 * 60;

impl From<::redis::RedisError> for QueueError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Redis backend for multi-process deployments.
///
/// Per queue: a ready list, a `retry_at` sorted set, a `lease_until`
/// sorted set and a dead-letter list. Records are JSON strings.
pub struct RedisBackend {
    conn: ConnectionManager,
    prefix: String,
    lease_script: Script,
    promote_script: Script,
    event_broadcaster: broadcast::Sender<DeliveryEvent>,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let (event_broadcaster, _) = broadcast::channel(1000);
        debug!("Connected to redis queue backend");

        Ok(Self {
            conn,
            prefix: "lens".to_string(),
            lease_script: Script::new(LEASE_SCRIPT),
            promote_script: Script::new(PROMOTE_SCRIPT),
            event_broadcaster,
        })
    }

    /// Namespace every key under `prefix`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn queues_key(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    fn record_key(&self, id: &MessageId) -> String {
        format!("{}:msg:{}", self.prefix, id)
    }

    fn queue_key(&self, queue: &str, part: &str) -> String {
        format!("{}:q:{}:{}", self.prefix, queue, part)
    }

    async fn load(&self, id: &MessageId) -> QueueResult<MessageRecord> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.record_key(id)).await?;
        let raw = raw.ok_or_else(|| QueueError::MessageNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn store(&self, record: &MessageRecord) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(record)?;
        let key = self.record_key(&record.id);
        if matches!(record.status, crate::DeliveryStatus::Acked { .. }) {
            let _: () = conn.set_ex(key, raw, ACKED_TTL_SECS).await?;
        } else {
            let _: () = conn.set(key, raw).await?;
        }
        Ok(())
    }

    /// Settle a failed delivery that is no longer in the lease set
    async fn settle_failure(
        &self,
        record: &mut MessageRecord,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<(NackOutcome, DeliveryEvent)> {
        let mut conn = self.conn.clone();
        let now = Utc::now();
        match retry_at {
            Some(retry_at) if !record.deliveries_exhausted() => {
                record.schedule_retry(retry_at, error.clone());
                self.store(record).await?;
                let _: () = conn
                    .zadd(
                        self.queue_key(&record.queue, "delayed"),
                        record.id.as_str(),
                        retry_at.timestamp_millis(),
                    )
                    .await?;
                Ok((
                    NackOutcome::Retrying { retry_at },
                    DeliveryEvent::Retrying {
                        id: record.id.clone(),
                        retry_at,
                        error,
                        at: now,
                    },
                ))
            }
            _ => {
                record.dead_letter(error.clone());
                self.store(record).await?;
                let _: () = conn
                    .rpush(self.queue_key(&record.queue, "dead"), record.id.as_str())
                    .await?;
                Ok((
                    NackOutcome::DeadLettered,
                    DeliveryEvent::DeadLettered {
                        id: record.id.clone(),
                        reason: error,
                        at: now,
                    },
                ))
            }
        }
    }

    async fn release_lease(&self, record: &MessageRecord) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .zrem(self.queue_key(&record.queue, "leased"), record.id.as_str())
            .await?;
        Ok(removed > 0)
    }

    fn emit(&self, event: DeliveryEvent) {
        let _ = self.event_broadcaster.send(event);
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn declare(&self, queue: &str) -> QueueResult<()> {
        check_queue_name(queue)?;
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(self.queues_key(), queue).await?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        max_deliveries: u32,
    ) -> QueueResult<MessageId> {
        self.declare(queue).await?;
        let record = MessageRecord::new(queue, payload, max_deliveries);
        self.store(&record).await?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(self.queue_key(queue, "ready"), record.id.as_str())
            .await?;

        self.emit(DeliveryEvent::Published {
            id: record.id.clone(),
            queue: queue.to_string(),
            at: record.created_at,
        });
        Ok(record.id)
    }

    async fn receive(&self, queue: &str, lease: Duration) -> QueueResult<Option<Delivery>> {
        let now = Utc::now();
        let lease_until = lease_deadline(now, lease);
        let ready = self.queue_key(queue, "ready");
        let mut conn = self.conn.clone();

        let _: i64 = self
            .promote_script
            .key(self.queue_key(queue, "delayed"))
            .key(&ready)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let leased: Option<String> = self
            .lease_script
            .key(&ready)
            .key(self.queue_key(queue, "leased"))
            .arg(lease_until.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        let Some(id) = leased.map(MessageId::from) else {
            return Ok(None);
        };

        let mut record = self.load(&id).await?;
        let lease_token = record.start_lease(lease_until);
        self.store(&record).await?;

        self.emit(DeliveryEvent::Leased {
            id: id.clone(),
            attempt: record.attempts,
            lease_until,
            at: now,
        });
        Ok(Some(Delivery {
            record,
            lease_token,
            lease_until,
        }))
    }

    async fn ack(&self, id: &MessageId, token: &LeaseToken) -> QueueResult<()> {
        let now = Utc::now();
        let mut record = self.load(id).await?;
        record.verify_lease(token, now)?;
        record.ack();
        self.store(&record).await?;
        self.release_lease(&record).await?;

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
        let mut record = self.load(id).await?;
        record.verify_lease(token, Utc::now())?;
        if !self.release_lease(&record).await? {
            // the reaper got there first
            return Err(QueueError::LeaseExpired);
        }

        let (outcome, event) = self.settle_failure(&mut record, error, retry_at).await?;
        self.emit(event);
        Ok(outcome)
    }

    async fn reclaim_expired(&self) -> QueueResult<usize> {
        let now = Utc::now();
        let mut conn = self.conn.clone();
        let queues: Vec<String> = conn.smembers(self.queues_key()).await?;
        let mut reclaimed = 0;

        for queue in queues {
            let expired: Vec<String> = conn
                .zrangebyscore(self.queue_key(&queue, "leased"), "-inf", now.timestamp_millis())
                .await?;

            for id in expired.into_iter().map(MessageId::from) {
                let mut record = match self.load(&id).await {
                    Ok(record) => record,
                    Err(QueueError::MessageNotFound(_)) => {
                        let _: i64 = conn
                            .zrem(self.queue_key(&queue, "leased"), id.as_str())
                            .await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if !record.lease_expired(now) || !self.release_lease(&record).await? {
                    continue;
                }

                let (_, event) = self
                    .settle_failure(&mut record, "Lease expired".to_string(), Some(now))
                    .await?;
                self.emit(event);
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    async fn dead_letters(&self, queue: &str) -> QueueResult<Vec<MessageRecord>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.lrange(self.queue_key(queue, "dead"), 0, -1).await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids.into_iter().map(MessageId::from) {
            match self.load(&id).await {
                Ok(record) => records.push(record),
                Err(QueueError::MessageNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    async fn pending(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let ready: usize = conn.llen(self.queue_key(queue, "ready")).await?;
        let delayed: usize = conn.zcard(self.queue_key(queue, "delayed")).await?;
        let leased: usize = conn.zcard(self.queue_key(queue, "leased")).await?;
        Ok(ready + delayed + leased)
    }

    async fn get_record(&self, id: &MessageId) -> QueueResult<MessageRecord> {
        self.load(id).await
    }

    fn event_stream(&self) -> BoxStream<DeliveryEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};

        let receiver = self.event_broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::distributed()
    }
}
