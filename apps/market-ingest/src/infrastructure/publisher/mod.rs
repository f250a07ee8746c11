//! Redis Streams Publisher
//!
//! Appends each event to a Redis stream with `XADD <stream> * type <t> ts
//! <ts> payload <json>`. The connection manager reconnects on its own; a
//! failed append is returned to the caller, which logs it and moves on.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::application::ports::{EventPublisherPort, PublishError};
use crate::domain::events::NormalizedEvent;

/// Default stream key.
pub const DEFAULT_STREAM_KEY: &str = "market:updates";

/// Time allowed for the initial connection and `PING`.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Normalize an address to a `redis://` URL. `host:port` gains the scheme;
/// URLs with a scheme pass through.
#[must_use]
pub fn redis_url(address: &str) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{address}")
    }
}

/// Durable publisher backed by a Redis stream.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    stream: String,
}

impl std::fmt::Debug for RedisStreamPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamPublisher")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl RedisStreamPublisher {
    /// Connect to `address` and verify with `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ConnectionError`] if the URL is invalid, the
    /// server is unreachable, or the handshake exceeds three seconds.
    pub async fn connect(address: &str, stream: impl Into<String>) -> Result<Self, PublishError> {
        let url = redis_url(address);
        let client = redis::Client::open(url.as_str()).map_err(connection_error)?;

        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| PublishError::ConnectionError {
                message: format!("timed out connecting to {address}"),
            })?
            .map_err(connection_error)?;

        let _pong: String = tokio::time::timeout(CONNECT_TIMEOUT, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| PublishError::ConnectionError {
                message: "PING timed out".to_string(),
            })?
            .map_err(connection_error)?;

        let stream = stream.into();
        tracing::info!(stream = %stream, "Connected to Redis");
        Ok(Self { conn, stream })
    }

    /// Stream key.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

fn connection_error(err: redis::RedisError) -> PublishError {
    PublishError::ConnectionError {
        message: err.to_string(),
    }
}

/// `XADD <stream> * type <type> ts <rfc3339> payload <json>`
fn xadd_command(stream: &str, event: &NormalizedEvent) -> Result<redis::Cmd, PublishError> {
    let payload = event
        .payload_json()
        .map_err(|e| PublishError::SerializationError {
            message: e.to_string(),
        })?;

    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream)
        .arg("*")
        .arg("type")
        .arg(event.event_type().as_str())
        .arg("ts")
        .arg(event.timestamp_rfc3339())
        .arg("payload")
        .arg(payload);
    Ok(cmd)
}

#[async_trait]
impl EventPublisherPort for RedisStreamPublisher {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), PublishError> {
        let cmd = xadd_command(&self.stream, event)?;

        let mut conn = self.conn.clone();
        let _id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| PublishError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::events::{EventPayload, VolatilityPayload};

    #[test_case("localhost:6379", "redis://localhost:6379" ; "bare host and port")]
    #[test_case("redis://cache:6380/1", "redis://cache:6380/1" ; "redis scheme kept")]
    #[test_case("rediss://secure:6379", "rediss://secure:6379" ; "tls scheme kept")]
    #[test_case("  10.0.0.5:6379 ", "redis://10.0.0.5:6379" ; "whitespace trimmed")]
    fn normalizes_address(input: &str, expected: &str) {
        assert_eq!(redis_url(input), expected);
    }

    #[test]
    fn xadd_carries_type_timestamp_and_payload_fields() {
        let event = NormalizedEvent::new(EventPayload::Volatility(VolatilityPayload {
            symbol: "AAPL".to_string(),
            annualized_vol_30d: 0.25,
        }));
        let cmd = xadd_command("market:updates", &event).unwrap();

        let args: Vec<String> = cmd
            .args_iter()
            .map(|arg| match arg {
                redis::Arg::Simple(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
                redis::Arg::Cursor => "<cursor>".to_string(),
            })
            .collect();

        assert_eq!(args.len(), 9);
        assert_eq!(&args[..5], ["XADD", "market:updates", "*", "type", "volatility"]);
        assert_eq!(args[5], "ts");
        assert_eq!(args[6], event.timestamp_rfc3339());
        assert_eq!(args[7], "payload");

        let payload: serde_json::Value = serde_json::from_str(&args[8]).unwrap();
        assert_eq!(payload["symbol"], "AAPL");
        assert_eq!(payload["annualized_vol_30d"], 0.25);
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        // Port 1 is reserved and closed on test hosts.
        let result = RedisStreamPublisher::connect("127.0.0.1:1", DEFAULT_STREAM_KEY).await;
        assert!(matches!(result, Err(PublishError::ConnectionError { .. })));
    }
}
