//! Bridge Configuration Settings
//!
//! Configuration for the ingest bridge, loaded from environment variables.
//! [`BridgeConfig::from_lookup`] takes any key lookup so parsing is testable
//! without touching the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infrastructure::alpaca::{Credentials, NewsSymbols};

/// Default market data REST base.
pub const DEFAULT_DATA_BASE_URL: &str = "https://data.alpaca.markets";

/// Default trading REST base (paper).
pub const DEFAULT_TRADING_BASE_URL: &str = "https://paper-api.alpaca.markets";

const PRODUCTION_STREAM_URL: &str = "wss://stream.data.alpaca.markets";
const SANDBOX_STREAM_URL: &str = "wss://stream.data.sandbox.alpaca.markets";

/// Market data feed for the stock stream and bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// Consolidated tape.
    #[default]
    Sip,
    /// IEX only (free tier).
    Iex,
}

impl DataFeed {
    /// Parse a feed name; anything other than `iex` is SIP.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "iex" => Self::Iex,
            _ => Self::Sip,
        }
    }

    /// Feed name for URLs and query strings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
        }
    }
}

/// Decision process settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionSettings {
    /// Command line, whitespace separated.
    pub command: String,
    /// Wait before respawning after an unexpected exit.
    pub restart_backoff: Duration,
}

/// Durable stream settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    /// Address or URL.
    pub address: String,
    /// Stream key.
    pub stream: String,
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// API credentials shared by REST and streams.
    pub credentials: Credentials,
    /// Symbols to stream, uppercased and deduplicated.
    pub symbols: Vec<String>,
    /// News subscription.
    pub news_symbols: NewsSymbols,
    /// Market data REST base.
    pub data_base_url: String,
    /// Stream base, without the feed path.
    pub stream_ws_url: String,
    /// Trading REST base.
    pub trading_base_url: String,
    /// Stock feed.
    pub feed: DataFeed,
    /// Decision process, if configured.
    pub decision: Option<DecisionSettings>,
    /// Durable stream, if configured.
    pub redis: Option<RedisSettings>,
    /// Positions and orders poll interval, 5..=300s.
    pub positions_interval: Duration,
    /// Volatility refresh period.
    pub volatility_refresh: Duration,
    /// Fixed delay between stream reconnects.
    pub reconnect_delay: Duration,
    /// `false` runs one-shot REST mode.
    pub streaming: bool,
    /// Health server port, 0 disables.
    pub health_port: u16,
}

impl BridgeConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials or symbols are missing, or the
    /// symbols file cannot be read.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for each variable.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let key = required(&lookup, "APCA_API_KEY_ID", "ALPACA_KEY")?;
        let secret = required(&lookup, "APCA_API_SECRET_KEY", "ALPACA_SECRET")?;
        let credentials = Credentials::new(key, secret)
            .map_err(|_| ConfigError::EmptyValue("APCA_API_KEY_ID".to_string()))?;

        let symbols = match get("ACTIVE_SYMBOLS_FILE") {
            Some(path) => load_symbols_file(&resolve_path(&path))?,
            None => get("TICKERS")
                .map(|list| parse_symbol_list(&list))
                .unwrap_or_default(),
        };
        if symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }

        let news_symbols = match get("NEWS_SYMBOLS") {
            Some(value) if value == "*" => NewsSymbols::All,
            Some(value) => NewsSymbols::Only(parse_symbol_list(&value)),
            None => NewsSymbols::Only(symbols.clone()),
        };

        let data_base_url = get("ALPACA_DATA_BASE_URL").unwrap_or_else(|| DEFAULT_DATA_BASE_URL.to_string());
        let stream_ws_url = get("ALPACA_STREAM_WS_URL").unwrap_or_else(|| stream_url_for(&data_base_url).to_string());

        let decision = get("BRAIN_CMD").map(|command| DecisionSettings {
            command,
            restart_backoff: duration_secs(get("BRAIN_RESTART_BACKOFF_SECS"), Duration::from_secs(5)),
        });

        let redis = get("REDIS_URL").or_else(|| get("REDIS_ADDR")).map(|address| RedisSettings {
            address,
            stream: get("REDIS_STREAM").unwrap_or_else(|| "market:updates".to_string()),
        });

        let positions_secs = get("POSITIONS_INTERVAL_SEC")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(15)
            .clamp(5, 300);

        Ok(Self {
            credentials,
            symbols,
            news_symbols,
            stream_ws_url,
            trading_base_url: get("APCA_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TRADING_BASE_URL.to_string()),
            feed: get("ALPACA_DATA_FEED")
                .map(|v| DataFeed::from_str_case_insensitive(&v))
                .unwrap_or_default(),
            decision,
            redis,
            positions_interval: Duration::from_secs(positions_secs),
            volatility_refresh: duration_secs(get("VOLATILITY_REFRESH_SEC"), Duration::from_secs(300)),
            reconnect_delay: duration_secs(get("STREAM_RECONNECT_DELAY_SEC"), Duration::from_secs(5)),
            streaming: get("STREAM").is_none_or(|v| parse_streaming(&v)),
            health_port: get("HEALTH_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8082),
            data_base_url,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Neither `ACTIVE_SYMBOLS_FILE` nor `TICKERS` produced a symbol.
    #[error("no symbols configured (set ACTIVE_SYMBOLS_FILE or TICKERS)")]
    NoSymbols,
    /// Symbols file could not be read.
    #[error("failed to read symbols file {}: {source}", .path.display())]
    SymbolsFile {
        /// Resolved path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

fn required<F>(lookup: &F, primary: &str, fallback: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(primary)
        .or_else(|| lookup(fallback))
        .ok_or_else(|| ConfigError::MissingEnvVar(primary.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(primary.to_string()));
    }
    Ok(value.trim().to_string())
}

/// Shortest accepted interval or delay. Zero would spin the reconnect and
/// respawn loops and cannot drive a `tokio` interval.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

fn duration_secs(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
        .max(MIN_INTERVAL)
}

/// `false` and `0` disable streaming; anything else enables it.
#[must_use]
pub fn parse_streaming(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "false" | "0")
}

/// Stream base matching a data REST base.
#[must_use]
pub fn stream_url_for(data_base_url: &str) -> &'static str {
    if data_base_url.contains("sandbox") {
        SANDBOX_STREAM_URL
    } else {
        PRODUCTION_STREAM_URL
    }
}

/// Symbols from file text: one per line, `#` comments and blanks skipped,
/// uppercased, first occurrence kept.
#[must_use]
pub fn parse_symbols_text(text: &str) -> Vec<String> {
    normalize_symbols(text.lines())
}

/// Symbols from a comma-separated list.
#[must_use]
pub fn parse_symbol_list(list: &str) -> Vec<String> {
    normalize_symbols(list.split(','))
}

fn normalize_symbols<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let symbol = entry.to_uppercase();
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

fn resolve_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}

fn load_symbols_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    std::fs::read_to_string(path)
        .map(|text| parse_symbols_text(&text))
        .map_err(|source| ConfigError::SymbolsFile {
            path: path.to_path_buf(),
            source,
        })
}
