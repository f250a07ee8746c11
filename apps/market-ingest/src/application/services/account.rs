//! Account Poller
//!
//! Forwards broker positions and open orders to the decision process on a
//! fixed interval, starting immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::fanout::EventFanout;
use crate::application::ports::AccountPort;
use crate::domain::events::{EventPayload, NormalizedEvent, OrdersPayload, PositionsPayload};

/// Lower bound on the poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on the poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Periodic positions and orders snapshot.
pub struct AccountPoller {
    account: Arc<dyn AccountPort>,
    fanout: Arc<EventFanout>,
}

impl AccountPoller {
    /// Create a poller.
    #[must_use]
    pub fn new(account: Arc<dyn AccountPort>, fanout: Arc<EventFanout>) -> Self {
        Self { account, fanout }
    }

    /// Fetch and forward both snapshots. Each fetch fails independently.
    pub async fn poll_once(&self) {
        match self.account.positions().await {
            Ok(positions) => {
                tracing::debug!(count = positions.len(), "positions");
                let event =
                    NormalizedEvent::new(EventPayload::Positions(PositionsPayload { positions }));
                self.fanout.publish(event).await;
            }
            Err(e) => tracing::error!(error = %e, "Positions fetch failed"),
        }

        match self.account.open_orders().await {
            Ok(orders) => {
                tracing::debug!(count = orders.len(), "open orders");
                let event = NormalizedEvent::new(EventPayload::Orders(OrdersPayload { orders }));
                self.fanout.publish(event).await;
            }
            Err(e) => tracing::error!(error = %e, "Open orders fetch failed"),
        }
    }

    /// Poll now, then every `interval` (clamped to 5..=300s) until cancelled.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let interval = interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll_once().await,
            }
        }

        tracing::info!("Account poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{
        AccountError, DecisionSinkPort, Delivery, NoOpEventPublisher,
    };
    use crate::domain::events::{EventType, OrderSnapshot, PositionSnapshot};

    struct Account {
        fail_positions: bool,
    }

    #[async_trait]
    impl AccountPort for Account {
        async fn positions(&self) -> Result<Vec<PositionSnapshot>, AccountError> {
            if self.fail_positions {
                return Err(AccountError::Request {
                    message: "timeout".to_string(),
                });
            }
            Ok(vec![PositionSnapshot {
                symbol: "AAPL".to_string(),
                qty: Decimal::new(10, 0),
                side: "long".to_string(),
                market_value: None,
                cost_basis: None,
                unrealized_pl: None,
                unrealized_plpc: None,
                current_price: None,
            }])
        }

        async fn open_orders(&self) -> Result<Vec<OrderSnapshot>, AccountError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<EventType>>);

    #[async_trait]
    impl DecisionSinkPort for RecordingSink {
        async fn deliver(&self, event: &NormalizedEvent) -> Delivery {
            self.0.lock().push(event.event_type());
            Delivery::Written
        }

        fn status(&self) -> &'static str {
            "running"
        }
    }

    fn poller(fail_positions: bool) -> (AccountPoller, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let (fanout, _) = EventFanout::new(sink.clone(), Arc::new(NoOpEventPublisher), 1);
        (
            AccountPoller::new(Arc::new(Account { fail_positions }), Arc::new(fanout)),
            sink,
        )
    }

    #[tokio::test]
    async fn poll_emits_positions_then_orders() {
        let (poller, sink) = poller(false);
        poller.poll_once().await;
        assert_eq!(*sink.0.lock(), vec![EventType::Positions, EventType::Orders]);
    }

    #[tokio::test]
    async fn positions_failure_still_sends_orders() {
        let (poller, sink) = poller(true);
        poller.poll_once().await;
        assert_eq!(*sink.0.lock(), vec![EventType::Orders]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_immediately_and_stops_on_cancel() {
        let (poller, sink) = poller(false);
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            poller.run(Duration::from_secs(1), stop).await;
        });
        tokio::time::sleep(Duration::from_secs(6)).await;
        cancel.cancel();
        task.await.unwrap();

        // Interval clamped to 5s: ticks at 0s and 5s.
        assert_eq!(sink.0.lock().len(), 4);
    }
}
