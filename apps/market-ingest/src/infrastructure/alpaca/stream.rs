//! Stock Stream Client
//!
//! Connects to Alpaca's stock stream for real-time trades and quotes.
//!
//! # Stream URL
//!
//! - Production: `wss://stream.data.alpaca.markets/v2/{feed}`
//! - Sandbox: `wss://stream.data.sandbox.alpaca.markets/v2/{feed}`
//!
//! # Lifecycle
//!
//! `disconnected -> connecting -> authenticating -> subscribing -> streaming`.
//! [`PriceStreamClient::run`] drives one pass through that lifecycle and
//! returns on the first transport error; reconnecting is the caller's job.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth::Credentials;
use super::codec::JsonCodec;
use super::connection::{StreamError, authenticate, connect, next_text, subscribe};
use super::messages::{AlpacaMessage, StockQuoteMessage, StockTradeMessage, SubscriptionRequest};
use crate::infrastructure::health::{ConnectionState, FeedState};
use crate::infrastructure::metrics::{Feed, MessageType, record_decode_error, record_message_received};

// =============================================================================
// Events
// =============================================================================

/// Market data delivered to the consumer, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceEvent {
    /// A trade print.
    Trade(StockTradeMessage),
    /// A top-of-book quote.
    Quote(StockQuoteMessage),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stock stream client.
#[derive(Debug, Clone)]
pub struct PriceStreamConfig {
    /// Full WebSocket URL including the feed path.
    pub url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Symbols to subscribe for trades and quotes.
    pub symbols: Vec<String>,
}

impl PriceStreamConfig {
    /// Build a configuration for `{stream_base}/v2/{feed}`.
    #[must_use]
    pub fn new(
        stream_base: &str,
        feed: &str,
        credentials: Credentials,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            url: format!("{}/v2/{feed}", stream_base.trim_end_matches('/')),
            credentials,
            symbols,
        }
    }

    fn subscription(&self) -> SubscriptionRequest {
        SubscriptionRequest::subscribe()
            .with_trades(self.symbols.clone())
            .with_quotes(self.symbols.clone())
    }
}

// =============================================================================
// Client
// =============================================================================

/// Stock stream client with a last-known-price cache.
pub struct PriceStreamClient {
    config: PriceStreamConfig,
    codec: JsonCodec,
    event_tx: mpsc::Sender<PriceEvent>,
    cancel: CancellationToken,
    feed_state: Arc<FeedState>,
    last_prices: parking_lot::RwLock<HashMap<String, f64>>,
}

impl PriceStreamClient {
    /// Create a new client.
    #[must_use]
    pub fn new(
        config: PriceStreamConfig,
        event_tx: mpsc::Sender<PriceEvent>,
        cancel: CancellationToken,
        feed_state: Arc<FeedState>,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            event_tx,
            cancel,
            feed_state,
            last_prices: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Last trade price, or last positive quote mid, whichever came later.
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.last_prices.read().get(symbol).copied()
    }

    /// Run one connection lifecycle.
    ///
    /// Returns `Ok(())` when cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first dial, authentication, subscription, or transport
    /// error. Malformed frames are logged and skipped.
    pub async fn run(&self) -> Result<(), StreamError> {
        let result = tokio::select! {
            () = self.cancel.cancelled() => Ok(()),
            result = self.session() => result,
        };
        if result.is_ok() {
            self.feed_state.set_state(ConnectionState::Disconnected);
        }
        result
    }

    async fn session(&self) -> Result<(), StreamError> {
        tracing::info!(url = %self.config.url, "Connecting to price stream");
        self.feed_state.set_state(ConnectionState::Connecting);
        let mut ws = connect(&self.config.url, &self.config.credentials).await?;

        self.feed_state.set_state(ConnectionState::Authenticating);
        authenticate(&mut ws, &self.config.credentials, &self.codec).await?;

        self.feed_state.set_state(ConnectionState::Subscribing);
        let ack = subscribe(&mut ws, &self.config.subscription(), &self.codec).await?;
        tracing::info!(
            trades = ack.trades.len(),
            quotes = ack.quotes.len(),
            "Price stream subscribed"
        );

        self.feed_state.set_state(ConnectionState::Streaming);
        loop {
            let text = next_text(&mut ws).await?;
            self.handle_frame(&text).await?;
        }
    }

    async fn handle_frame(&self, text: &str) -> Result<(), StreamError> {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                record_decode_error(Feed::Stocks);
                tracing::warn!(error = %e, "Skipping malformed price frame");
                return Ok(());
            }
        };

        for e in &frame.errors {
            record_decode_error(Feed::Stocks);
            tracing::warn!(error = %e, "Skipping malformed price message");
        }

        for message in frame.messages {
            match message {
                AlpacaMessage::Trade(trade) => {
                    record_message_received(Feed::Stocks, MessageType::Trade);
                    self.feed_state.record_message();
                    self.last_prices
                        .write()
                        .insert(trade.symbol.clone(), trade.price);
                    self.dispatch(PriceEvent::Trade(trade)).await?;
                }
                AlpacaMessage::Quote(quote) => {
                    record_message_received(Feed::Stocks, MessageType::Quote);
                    self.feed_state.record_message();
                    let mid = quote.mid();
                    if mid > 0.0 {
                        self.last_prices.write().insert(quote.symbol.clone(), mid);
                    }
                    self.dispatch(PriceEvent::Quote(quote)).await?;
                }
                AlpacaMessage::Error(error) => {
                    record_message_received(Feed::Stocks, MessageType::Control);
                    tracing::error!(code = error.code, msg = %error.msg, "Price stream error frame");
                }
                AlpacaMessage::Subscription(sub) => {
                    record_message_received(Feed::Stocks, MessageType::Control);
                    tracing::info!(topics = sub.topic_count(), "Price subscription updated");
                }
                AlpacaMessage::Success(_) | AlpacaMessage::News(_) => {
                    record_message_received(Feed::Stocks, MessageType::Control);
                }
                AlpacaMessage::Ignored(msg_type) => {
                    tracing::trace!(msg_type = %msg_type, "Ignoring unhandled message type");
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&self, event: PriceEvent) -> Result<(), StreamError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| StreamError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (PriceStreamClient, mpsc::Receiver<PriceEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let config = PriceStreamConfig::new(
            "wss://stream.data.alpaca.markets/",
            "iex",
            Credentials::new("key", "secret").unwrap(),
            vec!["AAPL".to_string()],
        );
        let client = PriceStreamClient::new(
            config,
            tx,
            CancellationToken::new(),
            Arc::new(FeedState::new(Feed::Stocks)),
        );
        (client, rx)
    }

    #[test]
    fn config_builds_feed_url() {
        let (client, _rx) = client();
        assert_eq!(
            client.config.url,
            "wss://stream.data.alpaca.markets/v2/iex"
        );
        let request = client.config.subscription();
        assert_eq!(request.trades, vec!["AAPL"]);
        assert_eq!(request.quotes, vec!["AAPL"]);
    }

    #[tokio::test]
    async fn frame_updates_last_price_and_dispatches_in_order() {
        let (client, mut rx) = client();
        let text = r#"[
            {"T":"t","S":"AAPL","p":100.5,"s":10,"t":"2025-03-14T15:00:00Z"},
            {"T":"q","S":"AAPL","bp":100.0,"ap":102.0,"bs":1,"as":1,"t":"2025-03-14T15:00:01Z"}
        ]"#;
        client.handle_frame(text).await.unwrap();

        assert!(matches!(rx.recv().await, Some(PriceEvent::Trade(t)) if t.price == 100.5));
        assert!(matches!(rx.recv().await, Some(PriceEvent::Quote(_))));
        assert_eq!(client.last_price("AAPL"), Some(101.0));
        assert_eq!(client.last_price("MSFT"), None);
    }

    #[tokio::test]
    async fn zero_mid_quote_keeps_trade_price() {
        let (client, _rx) = client();
        let text = r#"[
            {"T":"t","S":"AAPL","p":99.0,"s":1,"t":"2025-03-14T15:00:00Z"},
            {"T":"q","S":"AAPL","bp":0,"ap":0,"bs":0,"as":0,"t":"2025-03-14T15:00:01Z"}
        ]"#;
        client.handle_frame(text).await.unwrap();
        assert_eq!(client.last_price("AAPL"), Some(99.0));
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (client, mut rx) = client();
        client.handle_frame("not json").await.unwrap();
        client
            .handle_frame(r#"[{"T":"error","code":405,"msg":"symbol limit exceeded"}]"#)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_receiver_ends_session() {
        let (client, rx) = client();
        drop(rx);
        let result = client
            .handle_frame(r#"[{"T":"t","S":"AAPL","p":1.0,"s":1,"t":"2025-03-14T15:00:00Z"}]"#)
            .await;
        assert!(matches!(result, Err(StreamError::ChannelClosed)));
    }
}
