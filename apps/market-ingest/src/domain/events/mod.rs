//! Normalized Events
//!
//! Every upstream occurrence becomes one [`NormalizedEvent`]: a type tag, a
//! UTC timestamp, and a payload whose shape is fixed by the tag. Events are
//! immutable once built and are shared across sinks behind an `Arc`.
//!
//! # Wire Envelope
//!
//! ```text
//! {"type":"trade","ts":"2025-03-14T15:00:00.123456789Z","payload":{...}}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

use crate::domain::session::Session;

// =============================================================================
// Event Type
// =============================================================================

/// Discriminator for event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Enriched trade.
    Trade,
    /// Enriched quote.
    Quote,
    /// News article.
    News,
    /// Refreshed per-symbol volatility.
    Volatility,
    /// Broker positions snapshot.
    Positions,
    /// Broker open orders snapshot.
    Orders,
}

impl EventType {
    /// Wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::News => "news",
            Self::Volatility => "volatility",
            Self::Positions => "positions",
            Self::Orders => "orders",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Trade enriched with rolling statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradePayload {
    /// Ticker symbol.
    pub symbol: String,
    /// Trade price.
    pub price: f64,
    /// Trade size.
    pub size: u64,
    /// Volume over the last minute.
    pub volume_1m: u64,
    /// Volume over the last five minutes.
    pub volume_5m: u64,
    /// One-minute return.
    pub return_1m: f64,
    /// Five-minute return.
    pub return_5m: f64,
    /// Session at enrichment time.
    pub session: Session,
    /// Annualized 30-day volatility, `0.0` when unknown.
    pub volatility: f64,
}

/// Quote enriched with rolling statistics computed at the mid price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotePayload {
    /// Ticker symbol.
    pub symbol: String,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Bid size.
    pub bid_size: u64,
    /// Ask size.
    pub ask_size: u64,
    /// `(bid + ask) / 2`.
    pub mid: f64,
    /// Volume over the last minute.
    pub volume_1m: u64,
    /// Volume over the last five minutes.
    pub volume_5m: u64,
    /// One-minute return at the mid.
    pub return_1m: f64,
    /// Five-minute return at the mid.
    pub return_5m: f64,
    /// Session at enrichment time.
    pub session: Session,
    /// Annualized 30-day volatility, `0.0` when unknown.
    pub volatility: f64,
}

/// News article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsPayload {
    /// Provider article id.
    pub id: i64,
    /// Headline.
    pub headline: String,
    /// Author.
    pub author: String,
    /// Creation time as sent by the provider.
    pub created_at: String,
    /// Last update time as sent by the provider.
    pub updated_at: String,
    /// Summary text.
    pub summary: String,
    /// Article URL.
    pub url: String,
    /// Related symbols.
    pub symbols: Vec<String>,
    /// Originating source.
    pub source: String,
}

/// One symbol's refreshed volatility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityPayload {
    /// Ticker symbol.
    pub symbol: String,
    /// Annualized volatility over the last 30 daily bars.
    pub annualized_vol_30d: f64,
}

/// Broker position.
///
/// Decimals accept strings or numbers on input and serialize as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Ticker symbol.
    pub symbol: String,
    /// Position quantity.
    pub qty: Decimal,
    /// `long` or `short`.
    #[serde(default)]
    pub side: String,
    /// Current market value.
    #[serde(default)]
    pub market_value: Option<Decimal>,
    /// Total cost basis.
    #[serde(default)]
    pub cost_basis: Option<Decimal>,
    /// Unrealized profit and loss.
    #[serde(default)]
    pub unrealized_pl: Option<Decimal>,
    /// Unrealized profit and loss percent.
    #[serde(default)]
    pub unrealized_plpc: Option<Decimal>,
    /// Current price.
    #[serde(default)]
    pub current_price: Option<Decimal>,
}

/// Positions snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionsPayload {
    /// All open positions.
    pub positions: Vec<PositionSnapshot>,
}

/// Broker order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Broker order id.
    pub id: String,
    /// Ticker symbol.
    pub symbol: String,
    /// `buy` or `sell`.
    pub side: String,
    /// Ordered quantity; absent for notional orders.
    #[serde(default)]
    pub qty: Option<Decimal>,
    /// Quantity filled so far.
    #[serde(default)]
    pub filled_qty: Decimal,
    /// Order type (`market`, `limit`, ...).
    #[serde(rename = "type")]
    pub order_type: String,
    /// Order status.
    pub status: String,
    /// Creation time as sent by the broker.
    pub created_at: String,
}

/// Open orders snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrdersPayload {
    /// Open orders.
    pub orders: Vec<OrderSnapshot>,
}

/// Payload union. The variant fixes the event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Trade payload.
    Trade(TradePayload),
    /// Quote payload.
    Quote(QuotePayload),
    /// News payload.
    News(NewsPayload),
    /// Volatility payload.
    Volatility(VolatilityPayload),
    /// Positions payload.
    Positions(PositionsPayload),
    /// Orders payload.
    Orders(OrdersPayload),
}

impl EventPayload {
    /// Event type implied by this payload.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Trade(_) => EventType::Trade,
            Self::Quote(_) => EventType::Quote,
            Self::News(_) => EventType::News,
            Self::Volatility(_) => EventType::Volatility,
            Self::Positions(_) => EventType::Positions,
            Self::Orders(_) => EventType::Orders,
        }
    }

    /// Symbol the payload refers to, when it refers to exactly one.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(p) => Some(&p.symbol),
            Self::Quote(p) => Some(&p.symbol),
            Self::Volatility(p) => Some(&p.symbol),
            Self::News(_) | Self::Positions(_) | Self::Orders(_) => None,
        }
    }
}

// =============================================================================
// Normalized Event
// =============================================================================

/// Immutable event delivered to the decision process and the durable stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(serialize_with = "serialize_rfc3339_nanos")]
    ts: DateTime<Utc>,
    payload: EventPayload,
}

impl NormalizedEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Build an event with an explicit timestamp.
    #[must_use]
    pub const fn at(payload: EventPayload, ts: DateTime<Utc>) -> Self {
        Self {
            event_type: payload.event_type(),
            ts,
            payload,
        }
    }

    /// Event type.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Construction timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }

    /// Timestamp as RFC 3339 with nanoseconds, `Z` suffix.
    #[must_use]
    pub fn timestamp_rfc3339(&self) -> String {
        self.ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Payload.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Payload alone as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload value cannot be represented in JSON.
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }

    /// Full envelope as one JSON line, newline included.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload value cannot be represented in JSON.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

fn serialize_rfc3339_nanos<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

// =============================================================================
// Tests
// =============================================================================
