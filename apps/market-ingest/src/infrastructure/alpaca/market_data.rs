//! Alpaca Market Data REST Client
//!
//! Historical bars, latest snapshots, and recent news from the data API.
//!
//! # Endpoints
//!
//! - `GET /v2/stocks/bars` (paginated by `next_page_token`)
//! - `GET /v2/stocks/snapshots`
//! - `GET /v1beta1/news`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::auth::Credentials;
use super::messages::NewsMessage;
use super::rest::{RestClient, RestError};
use crate::application::ports::{MarketDataError, MarketDataPort};

/// Request timeout for the data API.
pub const DATA_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Calendar days requested for daily bars; covers 30 sessions plus holidays.
const BARS_WINDOW_DAYS: i64 = 60;

/// Page size requested from the bars endpoint.
const BARS_PAGE_LIMIT: usize = 10_000;

/// Guard against a server that never stops paginating.
const MAX_BAR_PAGES: usize = 50;

/// Upper bound accepted by the news endpoint.
const MAX_NEWS_LIMIT: usize = 50;

// =============================================================================
// Response Types
// =============================================================================

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bar {
    /// Bar start time.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    /// Open.
    #[serde(rename = "o", default)]
    pub open: f64,
    /// High.
    #[serde(rename = "h", default)]
    pub high: f64,
    /// Low.
    #[serde(rename = "l", default)]
    pub low: f64,
    /// Close.
    #[serde(rename = "c")]
    pub close: f64,
    /// Volume.
    #[serde(rename = "v", default)]
    pub volume: f64,
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<HashMap<String, Vec<Bar>>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsPage {
    #[serde(default)]
    news: Vec<NewsMessage>,
}

/// Latest trade price.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SnapshotTrade {
    /// Price.
    #[serde(rename = "p")]
    pub price: f64,
}

/// Latest bid and ask.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SnapshotQuote {
    /// Bid price.
    #[serde(rename = "bp", default)]
    pub bid_price: f64,
    /// Ask price.
    #[serde(rename = "ap", default)]
    pub ask_price: f64,
}

/// Latest trade, quote, and daily bars for one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Latest trade.
    #[serde(default)]
    pub latest_trade: Option<SnapshotTrade>,
    /// Latest quote.
    #[serde(default)]
    pub latest_quote: Option<SnapshotQuote>,
    /// Current session's daily bar.
    #[serde(default)]
    pub daily_bar: Option<Bar>,
    /// Previous session's daily bar.
    #[serde(default)]
    pub prev_daily_bar: Option<Bar>,
}

/// Where a reference price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    /// Latest trade.
    LastTrade,
    /// Latest quote mid.
    MidQuote,
    /// Current daily close.
    DailyClose,
    /// Previous session close.
    PreviousClose,
}

impl PriceSource {
    /// Label for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LastTrade => "last_trade",
            Self::MidQuote => "mid_quote",
            Self::DailyClose => "daily_close",
            Self::PreviousClose => "previous_close",
        }
    }
}

impl Snapshot {
    /// Best available price: last trade, then mid quote, then daily close,
    /// then previous close. Non-positive candidates are skipped.
    #[must_use]
    pub fn reference_price(&self) -> Option<(f64, PriceSource)> {
        if let Some(trade) = self.latest_trade.filter(|t| t.price > 0.0) {
            return Some((trade.price, PriceSource::LastTrade));
        }
        if let Some(quote) = self
            .latest_quote
            .filter(|q| q.bid_price + q.ask_price > 0.0)
        {
            return Some((
                (quote.bid_price + quote.ask_price) / 2.0,
                PriceSource::MidQuote,
            ));
        }
        if let Some(bar) = self.daily_bar.as_ref().filter(|b| b.close > 0.0) {
            return Some((bar.close, PriceSource::DailyClose));
        }
        self.prev_daily_bar
            .as_ref()
            .filter(|b| b.close > 0.0)
            .map(|b| (b.close, PriceSource::PreviousClose))
    }
}

// =============================================================================
// Client
// =============================================================================

/// Market data REST client.
#[derive(Debug, Clone)]
pub struct MarketDataClient {
    rest: RestClient,
    feed: String,
}

impl MarketDataClient {
    /// Create a client for `base_url` using `feed` for bars.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, credentials: Credentials, feed: &str) -> Result<Self, RestError> {
        Ok(Self {
            rest: RestClient::new(base_url, credentials, DATA_API_TIMEOUT)?,
            feed: feed.to_string(),
        })
    }

    /// Daily bars for `symbols`, keeping the last `limit` per symbol, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns the first failed page.
    pub async fn get_daily_bars(
        &self,
        symbols: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<Bar>>, RestError> {
        let mut out: HashMap<String, Vec<Bar>> = HashMap::new();
        if symbols.is_empty() {
            return Ok(out);
        }

        let start = (Utc::now() - chrono::Duration::days(BARS_WINDOW_DAYS))
            .format("%Y-%m-%d")
            .to_string();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_BAR_PAGES {
            let mut query = vec![
                ("symbols", symbols.join(",")),
                ("timeframe", "1Day".to_string()),
                ("start", start.clone()),
                ("limit", BARS_PAGE_LIMIT.to_string()),
                ("adjustment", "raw".to_string()),
                ("feed", self.feed.clone()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("page_token", token));
            }

            let page: BarsPage = self.rest.get_json("/v2/stocks/bars", &query).await?;
            for (symbol, bars) in page.bars.unwrap_or_default() {
                out.entry(symbol).or_default().extend(bars);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        for bars in out.values_mut() {
            bars.sort_by_key(|b| b.timestamp);
            if bars.len() > limit {
                let excess = bars.len() - limit;
                *bars = bars.split_off(excess);
            }
        }

        Ok(out)
    }

    /// Latest snapshot per symbol.
    ///
    /// # Errors
    ///
    /// Returns an error on transport, status, or decode failure.
    pub async fn get_snapshots(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Snapshot>, RestError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        self.rest
            .get_json("/v2/stocks/snapshots", &[("symbols", symbols.join(","))])
            .await
    }

    /// Most recent articles for `symbols`, newest first. `limit` is clamped
    /// to 1..=50.
    ///
    /// # Errors
    ///
    /// Returns an error on transport, status, or decode failure.
    pub async fn get_news(
        &self,
        symbols: &[String],
        limit: usize,
    ) -> Result<Vec<NewsMessage>, RestError> {
        let mut query = vec![("limit", limit.clamp(1, MAX_NEWS_LIMIT).to_string())];
        if !symbols.is_empty() {
            query.push(("symbols", symbols.join(",")));
        }
        let page: NewsPage = self.rest.get_json("/v1beta1/news", &query).await?;
        Ok(page.news)
    }
}

impl From<RestError> for MarketDataError {
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
impl MarketDataPort for MarketDataClient {
    async fn daily_closes(
        &self,
        symbols: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<f64>>, MarketDataError> {
        let bars = self.get_daily_bars(symbols, limit).await?;
        Ok(bars
            .into_iter()
            .map(|(symbol, bars)| (symbol, bars.into_iter().map(|b| b.close).collect()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(json: &str) -> Snapshot {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn reference_price_prefers_last_trade() {
        let s = snapshot(
            r#"{"latestTrade":{"p":101.5,"s":10,"t":"2025-03-14T15:00:00Z"},
                "latestQuote":{"bp":100.0,"ap":102.0},
                "dailyBar":{"t":"2025-03-14T04:00:00Z","c":99.0}}"#,
        );
        assert_eq!(s.reference_price(), Some((101.5, PriceSource::LastTrade)));
    }

    #[test]
    fn reference_price_falls_back_in_order() {
        let s = snapshot(r#"{"latestQuote":{"bp":100.0,"ap":102.0}}"#);
        assert_eq!(s.reference_price(), Some((101.0, PriceSource::MidQuote)));

        let s = snapshot(
            r#"{"latestTrade":{"p":0},"latestQuote":{"bp":0,"ap":0},
                "dailyBar":{"t":"2025-03-14T04:00:00Z","c":0},
                "prevDailyBar":{"t":"2025-03-13T04:00:00Z","c":98.0}}"#,
        );
        assert_eq!(s.reference_price(), Some((98.0, PriceSource::PreviousClose)));

        assert_eq!(snapshot("{}").reference_price(), None);
    }

    #[test]
    fn bars_page_tolerates_null_bars() {
        let page: BarsPage = serde_json::from_str(r#"{"bars":null,"next_page_token":null}"#).unwrap();
        assert!(page.bars.is_none());
        assert!(page.next_page_token.is_none());
    }
}
