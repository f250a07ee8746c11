//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `MarketEventHandler`: enriches trades, quotes, and news
//! - `EventFanout`: delivers events to the decision process and durable stream
//! - `VolatilityRefresher`: periodic annualized volatility
//! - `AccountPoller`: periodic positions and open orders

pub mod account;
pub mod fanout;
pub mod market_events;
pub mod volatility;

pub use account::AccountPoller;
pub use fanout::{DEFAULT_PUBLISH_QUEUE_CAPACITY, EventFanout, PublisherWorker};
pub use market_events::{MarketEventHandler, QuoteTick};
pub use volatility::{DEFAULT_REFRESH_INTERVAL, VOLATILITY_BARS, VolatilityRefresher};
