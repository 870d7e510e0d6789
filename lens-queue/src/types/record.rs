use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LeaseToken, MessageId};

/// Message delivery lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DeliveryStatus {
    /// Waiting for its first delivery
    Ready,

    /// Leased by a consumer
    Leased { lease_until: DateTime<Utc> },

    /// Failed a delivery, eligible again at `retry_at`
    Retrying { retry_at: DateTime<Utc> },

    /// Acknowledged by a consumer
    Acked { acked_at: DateTime<Utc> },

    /// Out of deliveries or permanently rejected
    DeadLettered { at: DateTime<Utc>, reason: String },
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked { .. } | Self::DeadLettered { .. })
    }

    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Leased { .. })
    }

    /// Ready, or retrying with `retry_at <= now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Ready => true,
            Self::Retrying { retry_at } => *retry_at <= now,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Leased { .. } => "leased",
            Self::Retrying { .. } => "retrying",
            Self::Acked { .. } => "acked",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Message record - payload plus mutable delivery state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub queue: String,

    /// Opaque payload bytes, delivered as published
    pub payload: Vec<u8>,

    pub status: DeliveryStatus,

    /// Deliveries so far (1 on the first lease)
    pub attempts: u32,
    pub max_deliveries: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub lease_token: Option<LeaseToken>,
}

impl MessageRecord {
    pub fn new(queue: impl Into<String>, payload: Vec<u8>, max_deliveries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            queue: queue.into(),
            payload,
            status: DeliveryStatus::Ready,
            attempts: 0,
            max_deliveries: max_deliveries.max(1),
            created_at: now,
            updated_at: now,
            last_error: None,
            lease_token: None,
        }
    }

    /// True once the current delivery is the last one allowed
    pub fn deliveries_exhausted(&self) -> bool {
        self.attempts >= self.max_deliveries
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, DeliveryStatus::Leased { lease_until } if lease_until < now)
    }

    /// Start a delivery: bump the attempt count and hand out a fresh token
    pub fn start_lease(&mut self, lease_until: DateTime<Utc>) -> LeaseToken {
        let token = LeaseToken::new();
        self.attempts += 1;
        self.status = DeliveryStatus::Leased { lease_until };
        self.lease_token = Some(token.clone());
        self.updated_at = Utc::now();
        token
    }

    pub fn ack(&mut self) {
        self.status = DeliveryStatus::Acked { acked_at: Utc::now() };
        self.lease_token = None;
        self.updated_at = Utc::now();
    }

    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>, error: String) {
        self.status = DeliveryStatus::Retrying { retry_at };
        self.last_error = Some(error);
        self.lease_token = None;
        self.updated_at = Utc::now();
    }

    pub fn dead_letter(&mut self, reason: String) {
        self.status = DeliveryStatus::DeadLettered {
            at: Utc::now(),
            reason: reason.clone(),
        };
        self.last_error = Some(reason);
        self.lease_token = None;
        self.updated_at = Utc::now();
    }

    /// Check the caller holds the live lease on this record
    pub fn verify_lease(&self, token: &LeaseToken, now: DateTime<Utc>) -> crate::QueueResult<()> {
        if self.status.is_terminal() {
            return Err(crate::QueueError::AlreadyTerminal);
        }
        if self.lease_token.as_ref() != Some(token) {
            return Err(crate::QueueError::InvalidLeaseToken);
        }
        if self.lease_expired(now) {
            return Err(crate::QueueError::LeaseExpired);
        }
        Ok(())
    }
}

/// A message leased to one consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub record: MessageRecord,
    pub lease_token: LeaseToken,
    pub lease_until: DateTime<Utc>,
}

impl Delivery {
    pub fn id(&self) -> &MessageId {
        &self.record.id
    }

    pub fn queue(&self) -> &str {
        &self.record.queue
    }

    pub fn payload(&self) -> &[u8] {
        &self.record.payload
    }

    /// Payload as UTF-8, if it is
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.record.payload).ok()
    }

    /// 1-based delivery number
    pub fn attempt(&self) -> u32 {
        self.record.attempts
    }

    pub fn is_last_attempt(&self) -> bool {
        self.record.deliveries_exhausted()
    }
}

/// What a negative acknowledgement did to the message
#[derive(Debug, Clone, PartialEq)]
pub enum NackOutcome {
    Retrying { retry_at: DateTime<Utc> },
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueError;

    #[test]
    fn lease_lifecycle() {
        let mut record = MessageRecord::new("photos", b"abc".to_vec(), 2);
        assert!(record.status.is_eligible(Utc::now()));

        let until = Utc::now() + chrono::Duration::seconds(30);
        let token = record.start_lease(until);
        assert_eq!(record.attempts, 1);
        assert!(record.verify_lease(&token, Utc::now()).is_ok());
        assert!(matches!(
            record.verify_lease(&LeaseToken::new(), Utc::now()),
            Err(QueueError::InvalidLeaseToken)
        ));

        record.ack();
        assert!(record.status.is_terminal());
        assert!(matches!(
            record.verify_lease(&token, Utc::now()),
            Err(QueueError::AlreadyTerminal)
        ));
    }

    #[test]
    fn expired_lease_is_rejected() {
        let mut record = MessageRecord::new("photos", Vec::new(), 3);
        let token = record.start_lease(Utc::now() - chrono::Duration::seconds(1));
        assert!(record.lease_expired(Utc::now()));
        assert!(matches!(
            record.verify_lease(&token, Utc::now()),
            Err(QueueError::LeaseExpired)
        ));
    }

    #[test]
    fn max_deliveries_is_at_least_one() {
        let mut record = MessageRecord::new("photos", Vec::new(), 0);
        assert_eq!(record.max_deliveries, 1);
        record.start_lease(Utc::now());
        assert!(record.deliveries_exhausted());
    }

    #[test]
    fn future_retry_is_not_eligible() {
        let status = DeliveryStatus::Retrying {
            retry_at: Utc::now() + chrono::Duration::seconds(60),
        };
        assert!(!status.is_eligible(Utc::now()));
        assert_eq!(status.name(), "retrying");
    }
}
