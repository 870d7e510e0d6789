use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Invalid lease token")]
    InvalidLeaseToken,

    #[error("Lease has expired")]
    LeaseExpired,

    #[error("Message is already in terminal state")]
    AlreadyTerminal,

    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Channel is shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Errors a consumer loop can survive by backing off and polling again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::LeaseExpired | Self::InvalidLeaseToken | Self::Internal(_)
        )
    }
}

/// Handler outcome - determines redelivery behaviour
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Requeue with backoff while deliveries remain, then dead letter
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Dead letter immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_classification() {
        assert!(HandlerError::retryable("decode").is_retryable());
        assert!(!HandlerError::permanent("gone").is_retryable());
        assert_eq!(HandlerError::permanent("gone").message(), "gone");
        assert_eq!(HandlerError::retryable("x").to_string(), "Retryable error: x");
    }

    #[test]
    fn transient_errors() {
        assert!(QueueError::Backend("reset".into()).is_transient());
        assert!(!QueueError::Shutdown.is_transient());
        assert!(!QueueError::MessageNotFound("m".into()).is_transient());
    }
}
