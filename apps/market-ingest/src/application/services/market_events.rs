//! Market Event Enrichment
//!
//! Turns trades, quotes, and news into normalized events. Trades update the
//! rolling state before their statistics are read; quotes read statistics at
//! the mid price without touching the windows.
//!
//! Window statistics are evaluated at the tick's own exchange timestamp, so
//! a replayed or delayed frame sees the same windows it would have live. The
//! session label comes from the wall clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::fanout::EventFanout;
use crate::domain::events::{
    EventPayload, EventType, NewsPayload, NormalizedEvent, QuotePayload, TradePayload,
};
use crate::domain::rolling::RollingSymbolState;
use crate::domain::session::Session;
use crate::infrastructure::alpaca::{NewsMessage, PriceEvent};
use crate::infrastructure::metrics::record_enrichment_duration;

/// Minimum spacing of per-symbol debug lines on the price path.
const PRICE_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Top-of-book observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteTick {
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Bid size.
    pub bid_size: u64,
    /// Ask size.
    pub ask_size: u64,
}

/// Enriches upstream events and hands them to the fan-out.
pub struct MarketEventHandler {
    state: Arc<RollingSymbolState>,
    fanout: Arc<EventFanout>,
    session_clock: fn() -> Session,
    last_logged: Mutex<HashMap<String, Instant>>,
}

impl MarketEventHandler {
    /// Create a handler over shared state.
    #[must_use]
    pub fn new(state: Arc<RollingSymbolState>, fanout: Arc<EventFanout>) -> Self {
        Self {
            state,
            fanout,
            session_clock: Session::now,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the wall-clock session source.
    #[must_use]
    pub fn with_session_clock(mut self, clock: fn() -> Session) -> Self {
        self.session_clock = clock;
        self
    }

    /// Record a trade and build its event.
    #[must_use]
    pub fn enrich_trade(
        &self,
        symbol: &str,
        price: f64,
        size: u64,
        at: DateTime<Utc>,
    ) -> NormalizedEvent {
        self.state.record_trade(symbol, price, size, at);
        let stats = self.state.stats_at(symbol, price, at);

        NormalizedEvent::new(EventPayload::Trade(TradePayload {
            symbol: symbol.to_string(),
            price,
            size,
            volume_1m: stats.volume_1m,
            volume_5m: stats.volume_5m,
            return_1m: stats.return_1m,
            return_5m: stats.return_5m,
            session: (self.session_clock)(),
            volatility: stats.volatility,
        }))
    }

    /// Build a quote event with statistics at the mid.
    #[must_use]
    pub fn enrich_quote(&self, symbol: &str, quote: QuoteTick, at: DateTime<Utc>) -> NormalizedEvent {
        let mid = (quote.bid + quote.ask) / 2.0;
        let stats = self.state.stats_at(symbol, mid, at);

        NormalizedEvent::new(EventPayload::Quote(QuotePayload {
            symbol: symbol.to_string(),
            bid: quote.bid,
            ask: quote.ask,
            bid_size: quote.bid_size,
            ask_size: quote.ask_size,
            mid,
            volume_1m: stats.volume_1m,
            volume_5m: stats.volume_5m,
            return_1m: stats.return_1m,
            return_5m: stats.return_5m,
            session: (self.session_clock)(),
            volatility: stats.volatility,
        }))
    }

    /// Enrich and deliver one price event.
    pub async fn handle_price(&self, event: PriceEvent) {
        let started = Instant::now();

        let normalized = match event {
            PriceEvent::Trade(trade) => {
                if self.should_log(&trade.symbol) {
                    tracing::debug!(
                        symbol = %trade.symbol,
                        price = trade.price,
                        size = trade.size,
                        at = %trade.timestamp.format("%H:%M:%S"),
                        "trade"
                    );
                }
                self.enrich_trade(&trade.symbol, trade.price, trade.size, trade.timestamp)
            }
            PriceEvent::Quote(quote) => {
                if self.should_log(&quote.symbol) {
                    tracing::debug!(
                        symbol = %quote.symbol,
                        bid = quote.bid_price,
                        ask = quote.ask_price,
                        mid = quote.mid(),
                        at = %quote.timestamp.format("%H:%M:%S"),
                        "quote"
                    );
                }
                let tick = QuoteTick {
                    bid: quote.bid_price,
                    ask: quote.ask_price,
                    bid_size: quote.bid_size,
                    ask_size: quote.ask_size,
                };
                self.enrich_quote(&quote.symbol, tick, quote.timestamp)
            }
        };

        record_enrichment_duration(normalized.event_type(), started.elapsed());
        self.fanout.publish(normalized).await;
    }

    /// Deliver one news article.
    pub async fn handle_news(&self, article: NewsMessage) {
        let started = Instant::now();
        tracing::info!(
            symbols = %article.symbols.join(","),
            headline = %article.headline,
            created_at = %article.created_at,
            source = %article.source,
            "news"
        );

        let event = NormalizedEvent::new(EventPayload::News(NewsPayload::from(article)));
        record_enrichment_duration(EventType::News, started.elapsed());
        self.fanout.publish(event).await;
    }

    /// Consume both streams until cancelled or both senders close.
    ///
    /// Events from one stream are handled in arrival order.
    pub async fn run(
        &self,
        mut prices: mpsc::Receiver<PriceEvent>,
        mut news: mpsc::Receiver<NewsMessage>,
        cancel: CancellationToken,
    ) {
        let mut prices_open = true;
        let mut news_open = true;

        while prices_open || news_open {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = prices.recv(), if prices_open => match event {
                    Some(event) => self.handle_price(event).await,
                    None => prices_open = false,
                },
                article = news.recv(), if news_open => match article {
                    Some(article) => self.handle_news(article).await,
                    None => news_open = false,
                },
            }
        }

        tracing::info!("Market event handler stopped");
    }

    fn should_log(&self, symbol: &str) -> bool {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return false;
        }
        let now = Instant::now();
        let mut last = self.last_logged.lock();
        match last.get(symbol) {
            Some(at) if now.duration_since(*at) < PRICE_LOG_INTERVAL => false,
            _ => {
                last.insert(symbol.to_string(), now);
                true
            }
        }
    }
}
