use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Delivery events for structured observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    Published {
        id: MessageId,
        queue: String,
        at: DateTime<Utc>,
    },

    Leased {
        id: MessageId,
        attempt: u32,
        lease_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    Acked {
        id: MessageId,
        at: DateTime<Utc>,
    },

    Retrying {
        id: MessageId,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    DeadLettered {
        id: MessageId,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl DeliveryEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::Leased { .. } => "leased",
            Self::Acked { .. } => "acked",
            Self::Retrying { .. } => "retrying",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Published { id, .. }
            | Self::Leased { id, .. }
            | Self::Acked { id, .. }
            | Self::Retrying { id, .. }
            | Self::DeadLettered { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Published { at, .. }
            | Self::Leased { at, .. }
            | Self::Acked { at, .. }
            | Self::Retrying { at, .. }
            | Self::DeadLettered { at, .. } => at,
        }
    }
}
