//! Event Fan-out
//!
//! Delivers each [`NormalizedEvent`] to the decision process and, when a
//! durable publisher is configured, to a bounded queue drained by its own
//! worker task.
//!
//! The durable queue is fed with `try_send`: a full queue drops the event
//! for that sink only, so a slow Redis never delays the decision process.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::application::ports::{DecisionSinkPort, Delivery, EventPublisherPort};
use crate::domain::events::NormalizedEvent;
use crate::infrastructure::metrics::{
    Sink, record_event_dispatched, record_event_dropped, record_publish_failure,
};

/// Default capacity of the durable publisher queue.
pub const DEFAULT_PUBLISH_QUEUE_CAPACITY: usize = 10_000;

/// Sends events to every configured sink.
pub struct EventFanout {
    decision: Arc<dyn DecisionSinkPort>,
    durable: Option<mpsc::Sender<Arc<NormalizedEvent>>>,
}

impl EventFanout {
    /// Build a fan-out.
    ///
    /// Returns the worker that must be spawned to drain the durable queue,
    /// or `None` when `publisher` is disabled.
    #[must_use]
    pub fn new(
        decision: Arc<dyn DecisionSinkPort>,
        publisher: Arc<dyn EventPublisherPort>,
        queue_capacity: usize,
    ) -> (Self, Option<PublisherWorker>) {
        if !publisher.is_enabled() {
            return (
                Self {
                    decision,
                    durable: None,
                },
                None,
            );
        }

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                decision,
                durable: Some(tx),
            },
            Some(PublisherWorker { publisher, rx }),
        )
    }

    /// Deliver `event` to all sinks.
    ///
    /// Returns the decision sink outcome; durable delivery happens later on
    /// the worker.
    pub async fn publish(&self, event: NormalizedEvent) -> Delivery {
        let event = Arc::new(event);
        let event_type = event.event_type();

        if let Some(tx) = &self.durable {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    record_event_dropped(Sink::Durable, event_type, "queue_full");
                }
                Err(TrySendError::Closed(_)) => {
                    record_event_dropped(Sink::Durable, event_type, "worker_stopped");
                }
            }
        }

        let delivery = self.decision.deliver(&event).await;
        match delivery {
            Delivery::Written => record_event_dispatched(Sink::Pipe, event_type),
            Delivery::Dropped => record_event_dropped(Sink::Pipe, event_type, "sink_down"),
            Delivery::Backlogged => record_event_dropped(Sink::Pipe, event_type, "slow_sink"),
        }
        delivery
    }

    /// Decision sink status label.
    #[must_use]
    pub fn decision_status(&self) -> &'static str {
        self.decision.status()
    }
}

/// Drains the durable queue into the publisher.
pub struct PublisherWorker {
    publisher: Arc<dyn EventPublisherPort>,
    rx: mpsc::Receiver<Arc<NormalizedEvent>>,
}

impl PublisherWorker {
    /// Run until every [`EventFanout`] holding the queue is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            match self.publisher.publish(&event).await {
                Ok(()) => record_event_dispatched(Sink::Durable, event.event_type()),
                Err(e) => {
                    record_publish_failure();
                    tracing::warn!(
                        event_type = %event.event_type(),
                        error = %e,
                        "Durable publish failed"
                    );
                }
            }
        }
        tracing::debug!("Durable publisher worker stopped");
    }
}
