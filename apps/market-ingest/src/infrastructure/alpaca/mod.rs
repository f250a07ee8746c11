//! Alpaca Adapters
//!
//! - **Stock stream**: trades and quotes (JSON over WebSocket)
//! - **News stream**: articles (JSON over WebSocket)
//! - **Market data REST**: daily bars, snapshots, news
//! - **Trading REST**: positions and open orders

pub mod auth;
pub mod codec;
pub mod connection;
pub mod market_data;
pub mod messages;
pub mod news;
pub mod reconnect;
pub mod rest;
pub mod stream;
pub mod trading;

pub use auth::{AuthError, AuthHandler, AuthState, Credentials};
pub use codec::{CodecError, DecodedFrame, JsonCodec};
pub use connection::StreamError;
pub use market_data::{Bar, MarketDataClient, PriceSource, Snapshot};
pub use messages::*;
pub use news::{NewsStreamClient, NewsStreamConfig, NewsSymbols};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectPolicy, run_with_reconnect};
pub use rest::{RestClient, RestError};
pub use stream::{PriceEvent, PriceStreamClient, PriceStreamConfig};
pub use trading::TradingClient;
