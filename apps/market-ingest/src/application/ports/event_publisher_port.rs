//! Event Publisher Port (Driven Port)
//!
//! Durable append-only stream of normalized events. Best-effort: callers log
//! failures and move on.

use async_trait::async_trait;

use crate::domain::events::NormalizedEvent;

/// Event publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// Connection error.
    #[error("event publish connection error: {message}")]
    ConnectionError {
        /// Error details.
        message: String,
    },

    /// Serialization error.
    #[error("event serialization error: {message}")]
    SerializationError {
        /// Error details.
        message: String,
    },

    /// Append rejected.
    #[error("event publish failed: {message}")]
    PublishFailed {
        /// Error details.
        message: String,
    },
}

/// Port for appending events to a durable stream.
#[async_trait]
pub trait EventPublisherPort: Send + Sync {
    /// Append one event.
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), PublishError>;

    /// Whether this publisher does anything. The fan-out skips its queue
    /// for disabled publishers.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Publisher used when no durable stream is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisherPort for NoOpEventPublisher {
    async fn publish(&self, _event: &NormalizedEvent) -> Result<(), PublishError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
