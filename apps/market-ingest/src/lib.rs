#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Market Ingest - Streaming Ingestion Core
//!
//! Keeps Alpaca market data and news WebSocket connections alive, derives
//! rolling per-symbol statistics, and fans normalized events out to a
//! supervised decision process and an optional Redis stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: rolling windows, session classification, volatility math,
//!   normalized event shapes
//!
//! - **Application**: ports and services
//!   - `ports`: decision sink, durable publisher, market data, account
//!   - `services`: enrichment, fan-out, volatility refresh, account polling
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `alpaca`: stock and news streams, market data and trading REST
//!   - `pipe`: decision process supervisor
//!   - `publisher`: Redis Streams publisher
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Alpaca stock WS ──┐                                  ┌──► decision process stdin
//!                   ├──► enrichment ──► fan-out ───────┤
//! Alpaca news WS ───┘        ▲              ▲          └──► Redis stream (queued)
//!                            │              │
//!            volatility refresh      positions / orders poll
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Rolling state and event types with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{EventPayload, EventType, NormalizedEvent};
pub use domain::rolling::{RollingSymbolState, WindowStats};
pub use domain::session::Session;
pub use domain::volatility::annualized_volatility;

// Application services
pub use application::services::{
    AccountPoller, EventFanout, MarketEventHandler, PublisherWorker, VolatilityRefresher,
};

// Infrastructure config
pub use infrastructure::config::{BridgeConfig, ConfigError, DataFeed};

// Decision process supervisor
pub use infrastructure::pipe::{DecisionPipe, PipeConfig, PipeError, PipeState};

// Health server
pub use infrastructure::health::{FeedState, HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{Feed as MetricsFeed, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
