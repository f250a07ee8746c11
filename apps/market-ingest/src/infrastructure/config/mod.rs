//! Configuration Module
//!
//! Environment-driven configuration for the ingest bridge.

mod settings;

pub use settings::{
    BridgeConfig, ConfigError, DEFAULT_DATA_BASE_URL, DEFAULT_TRADING_BASE_URL, DataFeed,
    DecisionSettings, RedisSettings, parse_streaming, parse_symbol_list, parse_symbols_text,
    stream_url_for,
};
