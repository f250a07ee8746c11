//! Stream Session
//!
//! Connection steps shared by the stock and news streams: dial with
//! credential headers, authenticate, subscribe, then read text frames.
//! Every step fails the whole session on a transport error; callers
//! reconnect on a fresh socket.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::auth::{AUTH_TIMEOUT, AuthError, AuthHandler, Credentials};
use super::codec::{CodecError, JsonCodec};
use super::messages::{AlpacaMessage, SubscriptionMessage, SubscriptionRequest};

/// WebSocket stream type used by both stream clients.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors that end a stream session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Authentication rejected or timed out.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Control frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Outbound message could not be serialized.
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Credential could not be used as a header value.
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),

    /// Server rejected the subscription.
    #[error("subscription rejected ({code}): {message}")]
    SubscriptionRejected {
        /// Error code from server
        code: i32,
        /// Error message from server
        message: String,
    },

    /// No subscription acknowledgment in time.
    #[error("subscription acknowledgment timed out")]
    SubscriptionTimeout,

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Event receiver dropped.
    #[error("event channel closed")]
    ChannelClosed,
}

/// Open a WebSocket to `url` with Alpaca credential headers.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(url: &str, credentials: &Credentials) -> Result<WsStream, StreamError> {
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        "APCA-API-KEY-ID",
        HeaderValue::from_str(credentials.key())
            .map_err(|_| StreamError::InvalidHeader("APCA-API-KEY-ID"))?,
    );
    headers.insert(
        "APCA-API-SECRET-KEY",
        HeaderValue::from_str(credentials.secret())
            .map_err(|_| StreamError::InvalidHeader("APCA-API-SECRET-KEY"))?,
    );

    let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

/// Send the auth action and wait for `authenticated`.
///
/// # Errors
///
/// Returns [`AuthError::Timeout`] when no verdict arrives within
/// [`AUTH_TIMEOUT`], the mapped [`AuthError`] on an error frame, or a
/// transport error.
pub async fn authenticate(
    ws: &mut WsStream,
    credentials: &Credentials,
    codec: &JsonCodec,
) -> Result<(), StreamError> {
    let mut handler = AuthHandler::new(credentials.clone());
    let request = handler.begin();
    send_json(ws, &request).await?;

    tokio::time::timeout(AUTH_TIMEOUT, await_authenticated(ws, &mut handler, codec))
        .await
        .map_err(|_| StreamError::Auth(AuthError::Timeout))?
}

async fn await_authenticated(
    ws: &mut WsStream,
    handler: &mut AuthHandler,
    codec: &JsonCodec,
) -> Result<(), StreamError> {
    loop {
        let text = next_text(ws).await?;
        let frame = codec.decode(&text)?;
        for message in frame.messages {
            match message {
                AlpacaMessage::Success(success) => {
                    if handler.accept(&success) {
                        return Ok(());
                    }
                }
                AlpacaMessage::Error(error) => {
                    return Err(StreamError::Auth(handler.reject(&error)));
                }
                _ => {}
            }
        }
    }
}

/// Send a subscribe request and wait for the acknowledgment.
///
/// # Errors
///
/// Returns an error on an upstream error frame, on timeout, or on a
/// transport error.
pub async fn subscribe(
    ws: &mut WsStream,
    request: &SubscriptionRequest,
    codec: &JsonCodec,
) -> Result<SubscriptionMessage, StreamError> {
    send_json(ws, request).await?;

    tokio::time::timeout(AUTH_TIMEOUT, await_subscription(ws, codec))
        .await
        .map_err(|_| StreamError::SubscriptionTimeout)?
}

async fn await_subscription(
    ws: &mut WsStream,
    codec: &JsonCodec,
) -> Result<SubscriptionMessage, StreamError> {
    loop {
        let text = next_text(ws).await?;
        let frame = codec.decode(&text)?;
        for message in frame.messages {
            match message {
                AlpacaMessage::Subscription(sub) => return Ok(sub),
                AlpacaMessage::Error(error) => {
                    return Err(StreamError::SubscriptionRejected {
                        code: error.code,
                        message: error.msg,
                    });
                }
                _ => {}
            }
        }
    }
}

/// Read the next text frame, answering pings along the way.
///
/// # Errors
///
/// Returns [`StreamError::ConnectionClosed`] on a close frame or end of
/// stream, or the transport error.
pub async fn next_text(ws: &mut WsStream) -> Result<String, StreamError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => return Ok(text),
                Err(_) => tracing::debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Ping(data))) => ws.send(Message::Pong(data)).await?,
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Server sent close frame");
                return Err(StreamError::ConnectionClosed);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err(StreamError::ConnectionClosed),
        }
    }
}

async fn send_json<T: serde::Serialize>(ws: &mut WsStream, value: &T) -> Result<(), StreamError> {
    let json = serde_json::to_string(value)?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}
