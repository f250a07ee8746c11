//! Stream frame payloads.
//!
//! Every frame is a JSON array of objects tagged by `"T"`. The stock stream
//! (`/v2/{feed}`) sends `t` trades and `q` quotes, the news stream
//! (`/v1beta1/news`) sends `n` articles, and both send `success`, `error`
//! and `subscription` control objects. Keys on market data are the
//! single-letter abbreviations Alpaca uses on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::NewsPayload;

// =============================================================================
// Control
// =============================================================================

/// `{"T":"success","msg":"connected"|"authenticated"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Tag, `success`.
    #[serde(rename = "T")]
    pub msg_type: String,
    /// Acknowledged step.
    pub msg: SuccessKind,
}

/// Which step of the handshake a `success` frame acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Greeting sent on open.
    Connected,
    /// Login accepted.
    Authenticated,
}

/// `{"T":"error","code":402,"msg":"auth failed"}`
///
/// 401-404 and 406 concern login (see [`super::AuthError`]), 405 means the
/// symbol list was refused, 407 marks a slow consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Tag, `error`.
    #[serde(rename = "T")]
    pub msg_type: String,
    /// Numeric code.
    pub code: i32,
    /// Human-readable text, may be empty.
    #[serde(default)]
    pub msg: String,
}

/// Server echo of the channels now active on the socket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Tag, `subscription`.
    #[serde(rename = "T")]
    pub msg_type: String,
    /// Symbols streaming trades.
    #[serde(default)]
    pub trades: Vec<String>,
    /// Symbols streaming quotes.
    #[serde(default)]
    pub quotes: Vec<String>,
    /// Symbols streaming news.
    #[serde(default)]
    pub news: Vec<String>,
}

impl SubscriptionMessage {
    /// Entries across all three channel lists.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        [&self.trades, &self.quotes, &self.news]
            .iter()
            .map(|list| list.len())
            .sum()
    }
}

// =============================================================================
// Market data
// =============================================================================

/// One print from the consolidated tape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTradeMessage {
    /// Ticker (`S`).
    #[serde(rename = "S")]
    pub symbol: String,

    /// Print price (`p`).
    #[serde(rename = "p")]
    pub price: f64,

    /// Shares; absent on some odd-lot prints.
    #[serde(rename = "s", default)]
    pub size: u64,

    /// Exchange timestamp, nanosecond precision (`t`).
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// Per-venue trade id (`i`).
    #[serde(rename = "i", default)]
    pub trade_id: i64,

    /// Venue code (`x`).
    #[serde(rename = "x", default)]
    pub exchange: String,

    /// Condition codes (`c`).
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,

    /// Tape letter (`z`).
    #[serde(rename = "z", default)]
    pub tape: String,
}

/// Top-of-book update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuoteMessage {
    /// Ticker (`S`).
    #[serde(rename = "S")]
    pub symbol: String,

    /// Best bid (`bp`).
    #[serde(rename = "bp")]
    pub bid_price: f64,

    /// Best ask (`ap`).
    #[serde(rename = "ap")]
    pub ask_price: f64,

    /// Bid size in round lots (`bs`).
    #[serde(rename = "bs", default)]
    pub bid_size: u64,

    /// Ask size in round lots (`as`).
    #[serde(rename = "as", default)]
    pub ask_size: u64,

    /// Exchange timestamp, nanosecond precision (`t`).
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// Bid venue (`bx`).
    #[serde(rename = "bx", default)]
    pub bid_exchange: String,

    /// Ask venue (`ax`).
    #[serde(rename = "ax", default)]
    pub ask_exchange: String,

    /// Condition codes (`c`).
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,

    /// Tape letter (`z`).
    #[serde(rename = "z", default)]
    pub tape: String,
}

impl StockQuoteMessage {
    /// Midpoint of bid and ask. Quotes are enriched at this price.
    #[must_use]
    pub fn mid(&self) -> f64 {
        (self.bid_price + self.ask_price) / 2.0
    }
}

/// Article from the news stream. Timestamps stay as the provider's strings;
/// the body (`content`) is not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsMessage {
    /// Provider article id.
    pub id: i64,
    /// Title line.
    #[serde(default)]
    pub headline: String,
    /// Short abstract, often empty.
    #[serde(default)]
    pub summary: String,
    /// Byline.
    #[serde(default)]
    pub author: String,
    /// First publication, RFC 3339.
    #[serde(default)]
    pub created_at: String,
    /// Last revision, RFC 3339.
    #[serde(default)]
    pub updated_at: String,
    /// Link to the full article.
    #[serde(default)]
    pub url: String,
    /// Tickers the article is tagged with.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Wire service name.
    #[serde(default)]
    pub source: String,
}

impl From<NewsMessage> for NewsPayload {
    fn from(article: NewsMessage) -> Self {
        let NewsMessage {
            id,
            headline,
            summary,
            author,
            created_at,
            updated_at,
            url,
            symbols,
            source,
        } = article;

        Self {
            id,
            headline,
            author,
            created_at,
            updated_at,
            summary,
            url,
            symbols,
            source,
        }
    }
}

// =============================================================================
// Client actions
// =============================================================================

/// `{"action":"auth","key":..,"secret":..}`
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    /// Always `auth`.
    pub action: &'static str,
    /// Key id.
    pub key: String,
    /// Secret key.
    pub secret: String,
}

impl AuthRequest {
    /// Login action for a key pair.
    #[must_use]
    pub const fn new(key: String, secret: String) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// `{"action":"subscribe",...}`. Empty channel lists are left out of the
/// JSON so one request type serves both streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Always `subscribe`.
    pub action: &'static str,
    /// Trade channel symbols.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<String>,
    /// Quote channel symbols.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<String>,
    /// `["*"]` selects every article.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub news: Vec<String>,
}

impl SubscriptionRequest {
    /// Empty subscribe action.
    #[must_use]
    pub fn subscribe() -> Self {
        Self {
            action: "subscribe",
            ..Self::default()
        }
    }

    /// Replace the trade list.
    #[must_use]
    pub fn with_trades(self, trades: Vec<String>) -> Self {
        Self { trades, ..self }
    }

    /// Replace the quote list.
    #[must_use]
    pub fn with_quotes(self, quotes: Vec<String>) -> Self {
        Self { quotes, ..self }
    }

    /// Replace the news list.
    #[must_use]
    pub fn with_news(self, news: Vec<String>) -> Self {
        Self { news, ..self }
    }
}

// =============================================================================
// Decoded frame element
// =============================================================================

/// One element of a frame after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum AlpacaMessage {
    /// `success`
    Success(SuccessMessage),
    /// `error`
    Error(ErrorMessage),
    /// `subscription`
    Subscription(SubscriptionMessage),
    /// `t`
    Trade(StockTradeMessage),
    /// `q`
    Quote(StockQuoteMessage),
    /// `n`
    News(NewsMessage),
    /// Tag not consumed here (bars, statuses, corrections); carries the tag.
    Ignored(String),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use serde_json::json;

    use super::*;

    #[test]
    fn trade_keeps_optional_fields_when_present() {
        let trade: StockTradeMessage = serde_json::from_value(json!({
            "T": "t", "S": "NVDA", "i": 71, "x": "V", "p": 902.5, "s": 40,
            "t": "2025-03-14T15:30:00.123456789Z", "c": ["@"], "z": "C"
        }))
        .unwrap();

        assert_eq!(trade.symbol, "NVDA");
        assert_eq!(trade.price, 902.5);
        assert_eq!(trade.trade_id, 71);
        assert_eq!(trade.conditions, vec!["@"]);
        assert_eq!(trade.timestamp.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn trade_defaults_missing_optional_fields() {
        let trade: StockTradeMessage = serde_json::from_value(json!({
            "S": "MSFT", "p": 410.1, "t": "2025-03-14T15:00:00Z"
        }))
        .unwrap();

        assert_eq!(trade.size, 0);
        assert!(trade.exchange.is_empty());
        assert!(trade.conditions.is_empty());
    }

    #[test]
    fn quote_mid_is_the_average_of_bid_and_ask() {
        let quote: StockQuoteMessage = serde_json::from_value(json!({
            "S": "SPY", "bp": 500.25, "ap": 500.75, "bs": 3, "as": 9,
            "t": "2025-03-14T15:00:00Z"
        }))
        .unwrap();

        assert_eq!(quote.mid(), 500.5);
        assert_eq!((quote.bid_size, quote.ask_size), (3, 9));
    }

    #[test]
    fn article_body_is_discarded_on_conversion() {
        let article: NewsMessage = serde_json::from_value(json!({
            "T": "n", "id": 7, "headline": "Fed holds", "content": "<p>long body</p>",
            "symbols": ["SPY", "QQQ"], "source": "benzinga",
            "created_at": "2025-03-14T18:00:00Z", "updated_at": "2025-03-14T18:05:00Z"
        }))
        .unwrap();

        let payload = NewsPayload::from(article);
        assert_eq!(payload.id, 7);
        assert_eq!(payload.symbols, vec!["SPY", "QQQ"]);
        assert_eq!(payload.updated_at, "2025-03-14T18:05:00Z");
        assert!(payload.summary.is_empty());
    }

    #[test]
    fn control_objects_decode() {
        let ok: SuccessMessage =
            serde_json::from_value(json!({"T": "success", "msg": "authenticated"})).unwrap();
        assert_eq!(ok.msg, SuccessKind::Authenticated);

        let err: ErrorMessage = serde_json::from_value(json!({"T": "error", "code": 406})).unwrap();
        assert_eq!(err.code, 406);
        assert!(err.msg.is_empty());

        let sub: SubscriptionMessage = serde_json::from_value(
            json!({"T": "subscription", "trades": ["A", "B"], "quotes": ["A"]}),
        )
        .unwrap();
        assert_eq!(sub.topic_count(), 3);
    }

    #[test]
    fn actions_serialize_without_empty_channels() {
        let auth = AuthRequest::new("k".to_string(), "s".to_string());
        assert_eq!(
            serde_json::to_value(&auth).unwrap(),
            json!({"action": "auth", "key": "k", "secret": "s"})
        );

        let prices = SubscriptionRequest::subscribe()
            .with_trades(vec!["AAPL".to_string()])
            .with_quotes(vec!["AAPL".to_string()]);
        assert_eq!(
            serde_json::to_value(&prices).unwrap(),
            json!({"action": "subscribe", "trades": ["AAPL"], "quotes": ["AAPL"]})
        );

        let news = SubscriptionRequest::subscribe().with_news(vec!["*".to_string()]);
        assert_eq!(
            serde_json::to_string(&news).unwrap(),
            r#"{"action":"subscribe","news":["*"]}"#
        );
    }
}
