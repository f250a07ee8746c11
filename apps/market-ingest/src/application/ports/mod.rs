//! Application Ports (Driven)
//!
//! Ports define interfaces for the external systems this service talks to.
//! Each sink port has a no-op implementation selected when the real sink
//! is not configured, so the hot path never branches on configuration.

mod account_port;
mod decision_sink_port;
mod event_publisher_port;
mod market_data_port;

pub use account_port::{AccountError, AccountPort};
pub use decision_sink_port::{DecisionSinkPort, Delivery, NoOpDecisionSink};
pub use event_publisher_port::{EventPublisherPort, NoOpEventPublisher, PublishError};
pub use market_data_port::{MarketDataError, MarketDataPort};
