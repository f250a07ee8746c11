//! Prometheus recorder and the counters the ingest path bumps.
//!
//! Upstream traffic is labelled by `feed` and `message_type`, deliveries
//! by `sink`. The enrichment histogram spans frame receipt to fan-out.
//! Rendered by the health server under `/metrics`.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::events::EventType;

// =============================================================================
// Recorder
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, once per process.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Handle for rendering, `None` until [`init_metrics`] has run.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Descriptions
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_ingest_messages_received_total",
        "Total messages received from Alpaca streams"
    );
    describe_counter!(
        "market_ingest_decode_errors_total",
        "Total frames or elements that failed to decode"
    );
    describe_counter!(
        "market_ingest_reconnects_total",
        "Total stream reconnection attempts"
    );
    describe_gauge!(
        "market_ingest_stream_connected",
        "1 while a stream is subscribed and streaming"
    );

    describe_counter!(
        "market_ingest_events_dispatched_total",
        "Events delivered to a sink"
    );
    describe_counter!(
        "market_ingest_events_dropped_total",
        "Events not delivered to a sink"
    );
    describe_counter!(
        "market_ingest_publish_failures_total",
        "Durable stream append failures"
    );
    describe_counter!(
        "market_ingest_decision_restarts_total",
        "Decision process respawns"
    );

    describe_histogram!(
        "market_ingest_enrichment_seconds",
        "Time from frame receipt to fan-out"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Upstream stream labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Stock trades and quotes.
    Stocks,
    /// News articles.
    News,
}

impl Feed {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stocks => "stocks",
            Self::News => "news",
        }
    }
}

/// Upstream message labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Trade.
    Trade,
    /// Quote.
    Quote,
    /// News article.
    News,
    /// Control frame (success, error, subscription).
    Control,
}

impl MessageType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::News => "news",
            Self::Control => "control",
        }
    }
}

/// Delivery sink labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// Decision process stdin.
    Pipe,
    /// Durable append-only stream.
    Durable,
}

impl Sink {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Durable => "durable",
        }
    }
}

// =============================================================================
// Recording
// =============================================================================

/// Record a message received from a stream.
pub fn record_message_received(feed: Feed, msg_type: MessageType) {
    counter!(
        "market_ingest_messages_received_total",
        "feed" => feed.as_str(),
        "message_type" => msg_type.as_str()
    )
    .increment(1);
}

/// Record a decode failure.
pub fn record_decode_error(feed: Feed) {
    counter!("market_ingest_decode_errors_total", "feed" => feed.as_str()).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: Feed) {
    counter!("market_ingest_reconnects_total", "feed" => feed.as_str()).increment(1);
}

/// Set whether a stream is currently streaming.
pub fn set_stream_connected(feed: Feed, connected: bool) {
    gauge!("market_ingest_stream_connected", "feed" => feed.as_str())
        .set(if connected { 1.0 } else { 0.0 });
}

/// Record an event delivered to a sink.
pub fn record_event_dispatched(sink: Sink, event_type: EventType) {
    counter!(
        "market_ingest_events_dispatched_total",
        "sink" => sink.as_str(),
        "event_type" => event_type.as_str()
    )
    .increment(1);
}

/// Record an event dropped before reaching a sink.
pub fn record_event_dropped(sink: Sink, event_type: EventType, reason: &'static str) {
    counter!(
        "market_ingest_events_dropped_total",
        "sink" => sink.as_str(),
        "event_type" => event_type.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a failed durable stream append.
pub fn record_publish_failure() {
    counter!("market_ingest_publish_failures_total").increment(1);
}

/// Record a decision process respawn.
pub fn record_decision_restart() {
    counter!("market_ingest_decision_restarts_total").increment(1);
}

/// Record enrichment duration.
pub fn record_enrichment_duration(event_type: EventType, duration: Duration) {
    histogram!(
        "market_ingest_enrichment_seconds",
        "event_type" => event_type.as_str()
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_values() {
        assert_eq!(Feed::Stocks.as_str(), "stocks");
        assert_eq!(Feed::News.as_str(), "news");
        assert_eq!(MessageType::Control.as_str(), "control");
        assert_eq!(Sink::Durable.as_str(), "durable");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_message_received(Feed::Stocks, MessageType::Trade);
        record_event_dropped(Sink::Pipe, EventType::Quote, "restarting");
        set_stream_connected(Feed::News, true);
    }
}
