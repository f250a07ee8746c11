//! Enrichment Pipeline Integration Tests
//!
//! Feeds stream events through the handler and fan-out into recording
//! sinks, checking enrichment values and the JSON line envelope.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use market_ingest::application::ports::{
    DecisionSinkPort, Delivery, EventPublisherPort, PublishError,
};
use market_ingest::infrastructure::alpaca::{
    NewsMessage, PriceEvent, StockQuoteMessage, StockTradeMessage,
};
use market_ingest::domain::session::Session;
use market_ingest::{EventFanout, EventType, MarketEventHandler, NormalizedEvent, RollingSymbolState};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Recording sinks
// =============================================================================

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn json(&self) -> Vec<Value> {
        self.lines
            .lock()
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

#[async_trait]
impl DecisionSinkPort for RecordingSink {
    async fn deliver(&self, event: &NormalizedEvent) -> Delivery {
        self.lines.lock().push(event.to_json_line().unwrap());
        Delivery::Written
    }

    fn status(&self) -> &'static str {
        "running"
    }
}

#[derive(Default)]
struct RecordingPublisher {
    types: Mutex<Vec<EventType>>,
}

#[async_trait]
impl EventPublisherPort for RecordingPublisher {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), PublishError> {
        self.types.lock().push(event.event_type());
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn t0() -> DateTime<Utc> {
    // 11:00 New York time.
    "2025-03-14T15:00:00Z".parse().unwrap()
}

fn trade(price: f64, size: u64, at: DateTime<Utc>) -> PriceEvent {
    PriceEvent::Trade(StockTradeMessage {
        symbol: "AAPL".to_string(),
        price,
        size,
        timestamp: at,
        trade_id: 0,
        exchange: "V".to_string(),
        conditions: vec![],
        tape: "C".to_string(),
    })
}

fn quote(bid: f64, ask: f64, at: DateTime<Utc>) -> PriceEvent {
    PriceEvent::Quote(StockQuoteMessage {
        symbol: "AAPL".to_string(),
        bid_price: bid,
        ask_price: ask,
        bid_size: 4,
        ask_size: 6,
        timestamp: at,
        bid_exchange: "V".to_string(),
        ask_exchange: "V".to_string(),
        conditions: vec![],
        tape: "C".to_string(),
    })
}

fn article() -> NewsMessage {
    NewsMessage {
        id: 42,
        headline: "Apple announces buyback".to_string(),
        summary: String::new(),
        author: "Desk".to_string(),
        created_at: "2025-03-14T15:00:30Z".to_string(),
        updated_at: "2025-03-14T15:00:30Z".to_string(),
        url: "https://example.com/42".to_string(),
        symbols: vec!["AAPL".to_string()],
        source: "benzinga".to_string(),
    }
}

struct Pipeline {
    state: Arc<RollingSymbolState>,
    sink: Arc<RecordingSink>,
    publisher: Arc<RecordingPublisher>,
    handler: MarketEventHandler,
    worker: tokio::task::JoinHandle<()>,
}

fn pipeline() -> Pipeline {
    let state = Arc::new(RollingSymbolState::new());
    let sink = Arc::new(RecordingSink::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let (fanout, worker) = EventFanout::new(
        Arc::clone(&sink) as Arc<dyn DecisionSinkPort>,
        Arc::clone(&publisher) as Arc<dyn EventPublisherPort>,
        64,
    );
    let worker = tokio::spawn(worker.expect("enabled publisher has a worker").run());
    let handler = MarketEventHandler::new(Arc::clone(&state), Arc::new(fanout))
        .with_session_clock(|| Session::Regular);

    Pipeline {
        state,
        sink,
        publisher,
        handler,
        worker,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn trades_carry_rolling_volume_and_returns() {
    let Pipeline {
        state,
        sink,
        publisher,
        handler,
        worker,
    } = pipeline();
    state.set_volatility("AAPL", 0.25);

    handler.handle_price(trade(100.0, 10, t0())).await;
    handler
        .handle_price(trade(101.0, 20, t0() + TimeDelta::seconds(61)))
        .await;
    handler
        .handle_price(trade(101.5, 30, t0() + TimeDelta::seconds(62)))
        .await;

    drop(handler);
    timeout(WAIT, worker).await.unwrap().unwrap();

    let events = sink.json();
    assert_eq!(events.len(), 3);

    let first = &events[0]["payload"];
    assert_eq!(first["volume_1m"], 10);
    assert_eq!(first["return_1m"], 0.0, "no history yet reads as flat");
    assert_eq!(first["session"], "regular");
    assert_eq!(first["volatility"], 0.25);

    let second = &events[1]["payload"];
    assert_eq!(second["volume_1m"], 20, "the first trade left the minute window");
    assert_eq!(second["volume_5m"], 30);
    assert!((second["return_1m"].as_f64().unwrap() - 0.01).abs() < 1e-12);
    assert_eq!(second["return_5m"], 0.0);

    let third = &events[2]["payload"];
    assert_eq!(third["volume_1m"], 50);
    assert_eq!(third["volume_5m"], 60);

    assert_eq!(
        *publisher.types.lock(),
        vec![EventType::Trade, EventType::Trade, EventType::Trade]
    );
}

#[tokio::test]
async fn points_older_than_the_lookback_stop_counting() {
    let Pipeline {
        state,
        sink,
        handler,
        ..
    } = pipeline();

    handler.handle_price(trade(100.0, 10, t0())).await;
    handler.handle_price(trade(100.0, 20, t0() + TimeDelta::seconds(30))).await;

    let later = t0() + TimeDelta::minutes(7);
    handler.handle_price(trade(105.0, 5, later)).await;

    let last = sink.json().pop().unwrap();
    assert_eq!(last["payload"]["volume_1m"], 5);
    assert_eq!(last["payload"]["volume_5m"], 5);
    assert_eq!(last["payload"]["return_5m"], 0.0);

    assert_eq!(
        state.volume_since_at("AAPL", TimeDelta::minutes(5), later + TimeDelta::minutes(6)),
        0
    );
}

#[tokio::test]
async fn quotes_enrich_at_the_mid_without_recording_volume() {
    let Pipeline {
        state,
        sink,
        handler,
        ..
    } = pipeline();

    handler.handle_price(trade(100.0, 10, t0())).await;
    handler
        .handle_price(quote(100.5, 101.5, t0() + TimeDelta::seconds(61)))
        .await;

    let events = sink.json();
    let quote = &events[1];
    assert_eq!(quote["type"], "quote");
    assert_eq!(quote["payload"]["mid"], 101.0);
    assert_eq!(quote["payload"]["bid_size"], 4);
    assert!((quote["payload"]["return_1m"].as_f64().unwrap() - 0.01).abs() < 1e-9);
    assert_eq!(quote["payload"]["volume_1m"], 0);

    assert_eq!(
        state.volume_since_at("AAPL", TimeDelta::minutes(5), t0() + TimeDelta::seconds(61)),
        10
    );
}

#[tokio::test]
async fn handler_run_drains_both_streams_until_senders_close() {
    let Pipeline {
        sink,
        publisher,
        handler,
        worker,
        ..
    } = pipeline();

    let (price_tx, price_rx) = mpsc::channel(16);
    let (news_tx, news_rx) = mpsc::channel(16);
    let run = tokio::spawn(async move {
        handler.run(price_rx, news_rx, CancellationToken::new()).await;
    });

    price_tx.send(trade(100.0, 1, t0())).await.unwrap();
    news_tx.send(article()).await.unwrap();
    price_tx
        .send(trade(100.5, 2, t0() + TimeDelta::seconds(1)))
        .await
        .unwrap();
    drop(price_tx);
    drop(news_tx);

    timeout(WAIT, run).await.unwrap().unwrap();
    timeout(WAIT, worker).await.unwrap().unwrap();

    let events = sink.json();
    assert_eq!(events.len(), 3);

    let trades: Vec<f64> = events
        .iter()
        .filter(|e| e["type"] == "trade")
        .map(|e| e["payload"]["price"].as_f64().unwrap())
        .collect();
    assert_eq!(trades, vec![100.0, 100.5], "per-stream order is preserved");

    let news = events.iter().find(|e| e["type"] == "news").unwrap();
    assert_eq!(news["payload"]["id"], 42);
    assert_eq!(news["payload"]["symbols"][0], "AAPL");
    assert_eq!(news["payload"]["source"], "benzinga");

    assert_eq!(publisher.types.lock().len(), 3);
}

#[tokio::test]
async fn json_lines_have_type_timestamp_and_payload() {
    let Pipeline { sink, handler, .. } = pipeline();

    handler.handle_price(trade(187.25, 100, t0())).await;

    let lines = sink.lines.lock().clone();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with('\n'));
    assert_eq!(lines[0].matches('\n').count(), 1);

    let value: Value = serde_json::from_str(&lines[0]).unwrap();
    let object = value.as_object().unwrap();
    assert_eq!(object.len(), 3);
    assert_eq!(value["type"], "trade");
    assert!(value["ts"].as_str().unwrap().parse::<DateTime<Utc>>().is_ok());
    assert_eq!(value["payload"]["symbol"], "AAPL");
    assert_eq!(value["payload"]["size"], 100);
}
