//! Market Data Port (Driven Port)
//!
//! Historical daily closes for the volatility refresher.

use std::collections::HashMap;

use async_trait::async_trait;

/// Market data error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketDataError {
    /// Request did not complete.
    #[error("market data request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("market data returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Response body did not match the expected shape.
    #[error("market data response invalid: {message}")]
    Decode {
        /// Error details.
        message: String,
    },
}

/// Port for batched historical bars.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Up to `limit` most recent daily closes per symbol, oldest first.
    ///
    /// Symbols without bars are absent from the map.
    async fn daily_closes(
        &self,
        symbols: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<f64>>, MarketDataError>;
}
