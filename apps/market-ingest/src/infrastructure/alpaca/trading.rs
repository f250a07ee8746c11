//! Alpaca Trading REST Client
//!
//! Read-only view of the account: open positions and open orders. Orders
//! are placed by the decision process, not here.

use std::time::Duration;

use async_trait::async_trait;

use super::auth::Credentials;
use super::rest::{RestClient, RestError};
use crate::application::ports::{AccountError, AccountPort};
use crate::domain::events::{OrderSnapshot, PositionSnapshot};

/// Request timeout for the trading API.
pub const TRADING_API_TIMEOUT: Duration = Duration::from_secs(15);

/// Trading API client.
#[derive(Debug, Clone)]
pub struct TradingClient {
    rest: RestClient,
}

impl TradingClient {
    /// Create a client for `base_url` (paper or live).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, RestError> {
        Ok(Self {
            rest: RestClient::new(base_url, credentials, TRADING_API_TIMEOUT)?,
        })
    }

    /// `GET /v2/positions`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport, status, or decode failure.
    pub async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, RestError> {
        self.rest.get_json("/v2/positions", &[]).await
    }

    /// `GET /v2/orders?status=open`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport, status, or decode failure.
    pub async fn get_open_orders(&self) -> Result<Vec<OrderSnapshot>, RestError> {
        self.rest
            .get_json("/v2/orders", &[("status", "open".to_string())])
            .await
    }
}

impl From<RestError> for AccountError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http(e) => Self::Request {
                message: e.to_string(),
            },
            RestError::Status { status, body } => Self::Status {
                status,
                message: body,
            },
            RestError::Decode(e) => Self::Decode {
                message: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl AccountPort for TradingClient {
    async fn positions(&self) -> Result<Vec<PositionSnapshot>, AccountError> {
        Ok(self.get_positions().await?)
    }

    async fn open_orders(&self) -> Result<Vec<OrderSnapshot>, AccountError> {
        Ok(self.get_open_orders().await?)
    }
}
