//! Alpaca REST Transport
//!
//! Authenticated GET with JSON decoding, shared by the market data and
//! trading clients. No retries: callers run on timers and retry next tick.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use super::auth::Credentials;

/// REST errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Body did not decode.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Authenticated JSON GET client for one Alpaca base URL.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl RestClient {
    /// Create a client with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// GET `path` with query parameters and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Status`] on a non-2xx response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RestError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", self.credentials.key())
            .header("APCA-API-SECRET-KEY", self.credentials.secret())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!(%url, status = status.as_u16(), "Alpaca REST error response");
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
