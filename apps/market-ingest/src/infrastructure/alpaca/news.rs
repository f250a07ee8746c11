//! News Stream Client
//!
//! Same connection lifecycle as the stock stream, on `/v1beta1/news`. Each
//! article in a frame is dispatched on its own.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth::Credentials;
use super::codec::JsonCodec;
use super::connection::{StreamError, authenticate, connect, next_text, subscribe};
use super::messages::{AlpacaMessage, NewsMessage, SubscriptionRequest};
use crate::infrastructure::health::{ConnectionState, FeedState};
use crate::infrastructure::metrics::{Feed, MessageType, record_decode_error, record_message_received};

/// News topic selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewsSymbols {
    /// Every article (`["*"]`).
    All,
    /// Articles tagged with these symbols.
    Only(Vec<String>),
}

impl NewsSymbols {
    fn topics(&self) -> Vec<String> {
        match self {
            Self::All => vec!["*".to_string()],
            Self::Only(symbols) => symbols.clone(),
        }
    }
}

/// Configuration for the news stream client.
#[derive(Debug, Clone)]
pub struct NewsStreamConfig {
    /// Full WebSocket URL.
    pub url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Topic selection.
    pub symbols: NewsSymbols,
}

impl NewsStreamConfig {
    /// Build a configuration for `{stream_base}/v1beta1/news`.
    #[must_use]
    pub fn new(stream_base: &str, credentials: Credentials, symbols: NewsSymbols) -> Self {
        Self {
            url: format!("{}/v1beta1/news", stream_base.trim_end_matches('/')),
            credentials,
            symbols,
        }
    }
}

/// News stream client.
pub struct NewsStreamClient {
    config: NewsStreamConfig,
    codec: JsonCodec,
    event_tx: mpsc::Sender<NewsMessage>,
    cancel: CancellationToken,
    feed_state: Arc<FeedState>,
}

impl NewsStreamClient {
    /// Create a new client.
    #[must_use]
    pub fn new(
        config: NewsStreamConfig,
        event_tx: mpsc::Sender<NewsMessage>,
        cancel: CancellationToken,
        feed_state: Arc<FeedState>,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            event_tx,
            cancel,
            feed_state,
        }
    }

    /// Run one connection lifecycle; `Ok(())` when cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first dial, authentication, subscription, or transport
    /// error.
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
        tracing::info!(url = %self.config.url, "Connecting to news stream");
        self.feed_state.set_state(ConnectionState::Connecting);
        let mut ws = connect(&self.config.url, &self.config.credentials).await?;

        self.feed_state.set_state(ConnectionState::Authenticating);
        authenticate(&mut ws, &self.config.credentials, &self.codec).await?;

        self.feed_state.set_state(ConnectionState::Subscribing);
        let request = SubscriptionRequest::subscribe().with_news(self.config.symbols.topics());
        let ack = subscribe(&mut ws, &request, &self.codec).await?;
        tracing::info!(news = ?ack.news, "News stream subscribed");

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
                record_decode_error(Feed::News);
                tracing::warn!(error = %e, "Skipping malformed news frame");
                return Ok(());
            }
        };

        for e in &frame.errors {
            record_decode_error(Feed::News);
            tracing::warn!(error = %e, "Skipping malformed news article");
        }

        for message in frame.messages {
            match message {
                AlpacaMessage::News(article) => {
                    record_message_received(Feed::News, MessageType::News);
                    self.feed_state.record_message();
                    self.event_tx
                        .send(article)
                        .await
                        .map_err(|_| StreamError::ChannelClosed)?;
                }
                AlpacaMessage::Error(error) => {
                    record_message_received(Feed::News, MessageType::Control);
                    tracing::error!(code = error.code, msg = %error.msg, "News stream error frame");
                }
                AlpacaMessage::Ignored(msg_type) => {
                    tracing::trace!(msg_type = %msg_type, "Ignoring unhandled message type");
                }
                _ => record_message_received(Feed::News, MessageType::Control),
            }
        }

        Ok(())
    }
}
