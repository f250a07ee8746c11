//! Decision Sink Port (Driven Port)
//!
//! Primary delivery path: the decision process reading one JSON event per
//! line. Delivery never blocks on a restart and never returns an error;
//! the outcome is reported for accounting only.

use async_trait::async_trait;

use crate::domain::events::NormalizedEvent;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Line accepted into the process input, in order.
    Written,
    /// Sink down or closed; event discarded.
    Dropped,
    /// Process alive but not keeping up; event discarded.
    Backlogged,
}

/// Port for the decision process input.
#[async_trait]
pub trait DecisionSinkPort: Send + Sync {
    /// Deliver one event.
    async fn deliver(&self, event: &NormalizedEvent) -> Delivery;

    /// Status label for health reporting.
    fn status(&self) -> &'static str;

    /// Stop the sink and wait for it to wind down.
    async fn close(&self) {}
}

/// Sink used when no decision process is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDecisionSink;

#[async_trait]
impl DecisionSinkPort for NoOpDecisionSink {
    async fn deliver(&self, _event: &NormalizedEvent) -> Delivery {
        Delivery::Dropped
    }

    fn status(&self) -> &'static str {
        "disabled"
    }
}
