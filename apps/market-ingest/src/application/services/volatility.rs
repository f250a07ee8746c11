//! Volatility Refresher
//!
//! Fetches the last 30 daily closes for the whole symbol set in one batched
//! call, recomputes annualized volatility, merges it into the rolling state,
//! and emits one `volatility` event per symbol with a positive value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::fanout::EventFanout;
use crate::application::ports::{MarketDataError, MarketDataPort};
use crate::domain::events::{EventPayload, NormalizedEvent, VolatilityPayload};
use crate::domain::rolling::RollingSymbolState;
use crate::domain::volatility::annualized_volatility;

/// Daily bars used per refresh.
pub const VOLATILITY_BARS: usize = 30;

/// Default refresh period.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Periodic volatility refresh.
pub struct VolatilityRefresher {
    market_data: Arc<dyn MarketDataPort>,
    state: Arc<RollingSymbolState>,
    fanout: Arc<EventFanout>,
    symbols: Vec<String>,
}

impl VolatilityRefresher {
    /// Create a refresher for `symbols`.
    #[must_use]
    pub fn new(
        market_data: Arc<dyn MarketDataPort>,
        state: Arc<RollingSymbolState>,
        fanout: Arc<EventFanout>,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            market_data,
            state,
            fanout,
            symbols,
        }
    }

    /// Run one refresh.
    ///
    /// Symbols with fewer than two bars are left out of the returned map and
    /// keep any previous value in the state.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the state is untouched in that case.
    pub async fn refresh_once(&self) -> Result<HashMap<String, f64>, MarketDataError> {
        let closes = self
            .market_data
            .daily_closes(&self.symbols, VOLATILITY_BARS)
            .await?;

        let computed: HashMap<String, f64> = closes
            .iter()
            .filter_map(|(symbol, closes)| {
                annualized_volatility(closes).map(|vol| (symbol.clone(), vol))
            })
            .collect();

        self.state.set_volatility_map(computed.clone());

        for symbol in &self.symbols {
            let Some(&vol) = computed.get(symbol) else {
                continue;
            };
            if vol > 0.0 {
                tracing::info!(symbol = %symbol, annualized_30d_pct = vol * 100.0, "volatility");
                let event = NormalizedEvent::new(EventPayload::Volatility(VolatilityPayload {
                    symbol: symbol.clone(),
                    annualized_vol_30d: vol,
                }));
                self.fanout.publish(event).await;
            }
        }

        Ok(computed)
    }

    /// Refresh every `period` until cancelled. The first tick fires one
    /// period from now; run [`Self::refresh_once`] at startup for the
    /// initial fill.
    pub async fn run(&self, period: Duration, cancel: CancellationToken) {
        // `interval_at` panics on a zero period.
        let period = period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        tracing::error!(error = %e, "Volatility refresh failed");
                    }
                }
            }
        }

        tracing::info!("Volatility refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{
        DecisionSinkPort, Delivery, NoOpEventPublisher,
    };
    use crate::domain::events::EventType;

    struct FixedCloses(HashMap<String, Vec<f64>>);

    #[async_trait]
    impl MarketDataPort for FixedCloses {
        async fn daily_closes(
            &self,
            _symbols: &[String],
            _limit: usize,
        ) -> Result<HashMap<String, Vec<f64>>, MarketDataError> {
            Ok(self.0.clone())
        }
    }

    struct FailingCloses;

    #[async_trait]
    impl MarketDataPort for FailingCloses {
        async fn daily_closes(
            &self,
            _symbols: &[String],
            _limit: usize,
        ) -> Result<HashMap<String, Vec<f64>>, MarketDataError> {
            Err(MarketDataError::Status {
                status: 429,
                message: "rate limited".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<NormalizedEvent>>);

    #[async_trait]
    impl DecisionSinkPort for RecordingSink {
        async fn deliver(&self, event: &NormalizedEvent) -> Delivery {
            self.0.lock().push(event.clone());
            Delivery::Written
        }

        fn status(&self) -> &'static str {
            "running"
        }
    }

    fn refresher(
        market_data: Arc<dyn MarketDataPort>,
        state: Arc<RollingSymbolState>,
    ) -> (VolatilityRefresher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let (fanout, _) = EventFanout::new(sink.clone(), Arc::new(NoOpEventPublisher), 1);
        let symbols = vec!["AAPL".to_string(), "FLAT".to_string(), "NEW".to_string()];
        (
            VolatilityRefresher::new(market_data, state, Arc::new(fanout), symbols),
            sink,
        )
    }

    #[tokio::test]
    async fn refresh_merges_and_emits_positive_values() {
        let closes = HashMap::from([
            ("AAPL".to_string(), vec![100.0, 101.0, 99.0]),
            ("FLAT".to_string(), vec![50.0, 50.0, 50.0]),
            ("NEW".to_string(), vec![10.0]),
        ]);
        let state = Arc::new(RollingSymbolState::new());
        state.set_volatility("NEW", 0.4);
        let (refresher, sink) = refresher(Arc::new(FixedCloses(closes)), state.clone());

        let computed = refresher.refresh_once().await.unwrap();

        assert!(computed["AAPL"] > 0.0);
        assert!(computed["FLAT"].abs() < f64::EPSILON);
        assert!(!computed.contains_key("NEW"));
        assert_eq!(state.volatility("NEW"), Some(0.4));
        assert_eq!(state.volatility("FLAT"), Some(0.0));

        let events = sink.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), EventType::Volatility);
        assert_eq!(events[0].payload().symbol(), Some("AAPL"));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_values() {
        let state = Arc::new(RollingSymbolState::new());
        state.set_volatility("AAPL", 0.25);
        let (refresher, sink) = refresher(Arc::new(FailingCloses), state.clone());

        assert!(refresher.refresh_once().await.is_err());
        assert_eq!(state.volatility("AAPL"), Some(0.25));
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn zero_period_still_ticks_until_cancelled() {
        let closes = HashMap::from([("AAPL".to_string(), vec![100.0, 102.0, 101.0])]);
        let state = Arc::new(RollingSymbolState::new());
        let (refresher, sink) = refresher(Arc::new(FixedCloses(closes)), state.clone());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), refresher.run(Duration::ZERO, cancel))
            .await
            .expect("refresher did not stop");

        assert!(state.volatility("AAPL").is_some());
        assert!(!sink.0.lock().is_empty());
    }
}
