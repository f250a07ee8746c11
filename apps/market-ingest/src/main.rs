//! Market Ingest Binary
//!
//! Streams Alpaca trades, quotes, and news into the decision process.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY` (or `ALPACA_KEY` / `ALPACA_SECRET`)
//! - `ACTIVE_SYMBOLS_FILE` or `TICKERS`
//!
//! ## Optional
//! - `BRAIN_CMD`: decision process command line
//! - `REDIS_URL` / `REDIS_ADDR`, `REDIS_STREAM`: durable stream
//! - `ALPACA_DATA_FEED`: `sip` | `iex` (default: sip)
//! - `STREAM`: `false` for one-shot REST mode
//! - `POSITIONS_INTERVAL_SEC`: 5-300 (default: 15)
//! - `HEALTH_PORT`: health server port, 0 disables (default: 8082)
//! - `RUST_LOG` / `LOG_LEVEL`, `LOG_FORMAT`: logging
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: tracing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use market_ingest::application::ports::{
    DecisionSinkPort, EventPublisherPort, NoOpDecisionSink, NoOpEventPublisher,
};
use market_ingest::application::services::{
    AccountPoller, DEFAULT_PUBLISH_QUEUE_CAPACITY, EventFanout, MarketEventHandler,
    VOLATILITY_BARS, VolatilityRefresher,
};
use market_ingest::domain::rolling::RollingSymbolState;
use market_ingest::domain::volatility::annualized_volatility;
use market_ingest::infrastructure::alpaca::{
    MarketDataClient, NewsMessage, NewsStreamClient, NewsStreamConfig, PriceStreamClient,
    PriceStreamConfig, ReconnectPolicy, Snapshot, TradingClient, run_with_reconnect,
};
use market_ingest::infrastructure::health::{FeedState, HealthServer, HealthServerState};
use market_ingest::infrastructure::metrics::Feed;
use market_ingest::infrastructure::pipe::{DecisionPipe, PipeConfig};
use market_ingest::infrastructure::publisher::RedisStreamPublisher;
use market_ingest::infrastructure::telemetry;
use market_ingest::{BridgeConfig, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered price events between the stream reader and enrichment.
const PRICE_CHANNEL_CAPACITY: usize = 4096;

/// Buffered news articles between the stream reader and enrichment.
const NEWS_CHANNEL_CAPACITY: usize = 256;

/// Articles fetched in one-shot mode.
const ONE_SHOT_NEWS_LIMIT: usize = 50;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market ingest");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = BridgeConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    log_config(&config);

    let market_data = MarketDataClient::new(
        &config.data_base_url,
        config.credentials.clone(),
        config.feed.as_str(),
    )?;

    if !config.streaming {
        return run_one_shot(&config, &market_data).await;
    }

    run_streaming(config, market_data).await
}

/// Stream until SIGINT or SIGTERM.
async fn run_streaming(
    config: BridgeConfig,
    market_data: MarketDataClient,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown_token = CancellationToken::new();

    let stocks_state = Arc::new(FeedState::new(Feed::Stocks));
    let news_state = Arc::new(FeedState::new(Feed::News));

    let decision = start_decision_sink(&config);
    let publisher = connect_publisher(&config).await;

    let (fanout, worker) = EventFanout::new(
        Arc::clone(&decision),
        publisher,
        DEFAULT_PUBLISH_QUEUE_CAPACITY,
    );
    let fanout = Arc::new(fanout);
    let worker_handle = worker.map(|worker| tokio::spawn(worker.run()));

    let state = Arc::new(RollingSymbolState::new());

    // Initial fill before streaming; failures leave the map empty.
    let refresher = VolatilityRefresher::new(
        Arc::new(market_data),
        Arc::clone(&state),
        Arc::clone(&fanout),
        config.symbols.clone(),
    );
    if let Err(e) = refresher.refresh_once().await {
        tracing::error!(error = %e, "Initial volatility refresh failed");
    }

    let trading = TradingClient::new(&config.trading_base_url, config.credentials.clone())?;
    let poller = AccountPoller::new(Arc::new(trading), Arc::clone(&fanout));

    let (price_tx, price_rx) = mpsc::channel(PRICE_CHANNEL_CAPACITY);
    let (news_tx, news_rx) = mpsc::channel::<NewsMessage>(NEWS_CHANNEL_CAPACITY);

    let price_client = Arc::new(PriceStreamClient::new(
        PriceStreamConfig::new(
            &config.stream_ws_url,
            config.feed.as_str(),
            config.credentials.clone(),
            config.symbols.clone(),
        ),
        price_tx,
        shutdown_token.clone(),
        Arc::clone(&stocks_state),
    ));
    let news_client = NewsStreamClient::new(
        NewsStreamConfig::new(
            &config.stream_ws_url,
            config.credentials.clone(),
            config.news_symbols.clone(),
        ),
        news_tx,
        shutdown_token.clone(),
        Arc::clone(&news_state),
    );

    let handler = MarketEventHandler::new(state, Arc::clone(&fanout));
    drop(fanout);

    let mut tasks = JoinSet::new();

    let handler_cancel = shutdown_token.clone();
    tasks.spawn(async move {
        handler.run(price_rx, news_rx, handler_cancel).await;
    });

    let stream_client = Arc::clone(&price_client);
    let stream_state = Arc::clone(&stocks_state);
    let stream_cancel = shutdown_token.clone();
    let reconnect_delay = config.reconnect_delay;
    tasks.spawn(async move {
        let client = &*stream_client;
        run_with_reconnect(
            ReconnectPolicy::new(reconnect_delay),
            &stream_state,
            &stream_cancel,
            move || client.run(),
        )
        .await;
    });

    let news_feed_state = Arc::clone(&news_state);
    let news_cancel = shutdown_token.clone();
    tasks.spawn(async move {
        let client = &news_client;
        run_with_reconnect(
            ReconnectPolicy::new(reconnect_delay),
            &news_feed_state,
            &news_cancel,
            move || client.run(),
        )
        .await;
    });

    let refresh_cancel = shutdown_token.clone();
    let refresh_period = config.volatility_refresh;
    tasks.spawn(async move {
        refresher.run(refresh_period, refresh_cancel).await;
    });

    let poll_cancel = shutdown_token.clone();
    let poll_interval = config.positions_interval;
    tasks.spawn(async move {
        poller.run(poll_interval, poll_cancel).await;
    });

    if config.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&stocks_state),
            Arc::clone(&news_state),
            Arc::clone(&decision),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        tasks.spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tracing::info!(symbols = config.symbols.len(), "Market ingest ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Task ended abnormally");
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Tasks did not stop in time, aborting");
        tasks.abort_all();
    }

    if let Some(handle) = worker_handle
        && tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err()
    {
        tracing::warn!("Durable publisher did not drain in time");
    }

    for symbol in &config.symbols {
        if let Some(price) = price_client.last_price(symbol) {
            tracing::debug!(symbol = %symbol, price, "Last price");
        }
    }

    decision.close().await;

    tracing::info!("Market ingest stopped");
    Ok(())
}

/// Spawn the decision process, or fall back to a no-op sink.
fn start_decision_sink(config: &BridgeConfig) -> Arc<dyn DecisionSinkPort> {
    let Some(settings) = &config.decision else {
        tracing::info!("BRAIN_CMD not set, decision delivery disabled");
        return Arc::new(NoOpDecisionSink);
    };

    let pipe_config = PipeConfig {
        restart_backoff: settings.restart_backoff,
        ..PipeConfig::default()
    };
    match DecisionPipe::start(&settings.command, pipe_config) {
        Ok(pipe) => Arc::new(pipe),
        Err(e) => {
            tracing::error!(command = %settings.command, error = %e, "Decision process start failed");
            Arc::new(NoOpDecisionSink)
        }
    }
}

/// Connect the durable publisher, or fall back to a no-op publisher.
async fn connect_publisher(config: &BridgeConfig) -> Arc<dyn EventPublisherPort> {
    let Some(settings) = &config.redis else {
        return Arc::new(NoOpEventPublisher);
    };

    match RedisStreamPublisher::connect(&settings.address, settings.stream.clone()).await {
        Ok(publisher) => Arc::new(publisher),
        Err(e) => {
            tracing::error!(error = %e, "Redis not connected, durable stream disabled");
            Arc::new(NoOpEventPublisher)
        }
    }
}

/// Fetch news, snapshots, and bars once and log a summary.
async fn run_one_shot(
    config: &BridgeConfig,
    market_data: &MarketDataClient,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(data_url = %config.data_base_url, symbols = ?config.symbols, "One-shot REST");

    let news = market_data
        .get_news(&config.symbols, ONE_SHOT_NEWS_LIMIT)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "News fetch failed"))
        .unwrap_or_default();
    let snapshots = market_data
        .get_snapshots(&config.symbols)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Snapshots fetch failed"))
        .unwrap_or_default();
    let bars = market_data
        .get_daily_bars(&config.symbols, VOLATILITY_BARS)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Bars fetch failed"))?;

    let mut news_by_symbol: HashMap<&str, Vec<&NewsMessage>> = HashMap::new();
    for article in &news {
        for symbol in &article.symbols {
            news_by_symbol.entry(symbol.as_str()).or_default().push(article);
        }
    }

    for symbol in &config.symbols {
        for article in news_by_symbol.get(symbol.as_str()).into_iter().flatten() {
            tracing::info!(
                symbol = %symbol,
                headline = %article.headline,
                created_at = %article.created_at,
                source = %article.source,
                "news"
            );
        }

        match snapshots.get(symbol).and_then(Snapshot::reference_price) {
            Some((price, source)) => {
                tracing::info!(symbol = %symbol, price, source = source.as_str(), "price");
            }
            None => tracing::info!(symbol = %symbol, "price: no data"),
        }

        let closes: Vec<f64> = bars
            .get(symbol)
            .map(|bars| bars.iter().map(|b| b.close).collect())
            .unwrap_or_default();
        match annualized_volatility(&closes) {
            Some(vol) => tracing::info!(
                symbol = %symbol,
                bars = closes.len(),
                annualized_30d_pct = vol * 100.0,
                "volatility"
            ),
            None => tracing::debug!(symbol = %symbol, "volatility: not enough bars"),
        }
    }

    tracing::info!("One-shot done");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        symbols = ?config.symbols,
        feed = config.feed.as_str(),
        streaming = config.streaming,
        decision = config.decision.as_ref().map(|d| d.command.as_str()),
        redis_stream = config.redis.as_ref().map(|r| r.stream.as_str()),
        positions_interval_secs = config.positions_interval.as_secs(),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        data_url = %config.data_base_url,
        stream_url = %config.stream_ws_url,
        trading_url = %config.trading_base_url,
        "Alpaca endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
