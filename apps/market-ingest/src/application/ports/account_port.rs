//! Account Port (Driven Port)
//!
//! Broker positions and open orders, polled on a timer.

use async_trait::async_trait;

use crate::domain::events::{OrderSnapshot, PositionSnapshot};

/// Account fetch error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccountError {
    /// Request did not complete.
    #[error("account request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("account API returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Response body did not match the expected shape.
    #[error("account response invalid: {message}")]
    Decode {
        /// Error details.
        message: String,
    },
}

/// Port for broker account state.
#[async_trait]
pub trait AccountPort: Send + Sync {
    /// Open positions.
    async fn positions(&self) -> Result<Vec<PositionSnapshot>, AccountError>;

    /// Open orders.
    async fn open_orders(&self) -> Result<Vec<OrderSnapshot>, AccountError>;
}
