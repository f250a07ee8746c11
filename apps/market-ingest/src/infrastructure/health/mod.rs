//! Operational HTTP surface.
//!
//! | Route      | Answer                                                    |
//! |------------|-----------------------------------------------------------|
//! | `/health`  | JSON report; 503 while the price feed is down             |
//! | `/healthz` | `OK` whenever the process is serving                      |
//! | `/readyz`  | `READY` once the price feed streams, 503 before that      |
//! | `/metrics` | Prometheus text exposition                                |
//!
//! A missing news feed only degrades the report: enrichment keeps working
//! without it.

mod feed;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use feed::{ConnectionState, FeedReport, FeedState};

use crate::application::ports::DecisionSinkPort;
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Failures starting or running the HTTP listener.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Port unavailable.
    #[error("cannot listen on port {0}: {1}")]
    BindFailed(u16, String),

    /// Serving loop aborted.
    #[error("health server aborted: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Report
// =============================================================================

/// Rollup of the two feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Prices and news both streaming.
    Healthy,
    /// Prices streaming, news not.
    Degraded,
    /// Prices not streaming.
    Unhealthy,
}

impl HealthStatus {
    const fn rollup(prices: bool, news: bool) -> Self {
        match (prices, news) {
            (false, _) => Self::Unhealthy,
            (true, false) => Self::Degraded,
            (true, true) => Self::Healthy,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Healthy | Self::Degraded => StatusCode::OK,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Rollup.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Server clock.
    pub current_time: DateTime<Utc>,
    /// Price feed.
    pub stocks: FeedReport,
    /// News feed.
    pub news: FeedReport,
    /// Decision sink label, e.g. `running` or `restarting`.
    pub decision_process: &'static str,
}

/// What the handlers read from.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    stocks: Arc<FeedState>,
    news: Arc<FeedState>,
    decision: Arc<dyn DecisionSinkPort>,
}

impl HealthServerState {
    /// Capture the feeds and sink; uptime counts from here.
    #[must_use]
    pub fn new(
        version: String,
        stocks: Arc<FeedState>,
        news: Arc<FeedState>,
        decision: Arc<dyn DecisionSinkPort>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            stocks,
            news,
            decision,
        }
    }

    fn report(&self) -> HealthReport {
        let stocks = self.stocks.report();
        let news = self.news.report();
        HealthReport {
            status: HealthStatus::rollup(stocks.streaming, news.streaming),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            stocks,
            news,
            decision_process: self.decision.status(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Axum listener for the routes above.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Listener on `0.0.0.0:port` that stops when `cancel` fires.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// [`HealthServerError::BindFailed`] if the port is taken,
    /// [`HealthServerError::ServerFailed`] if serving aborts.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let Self {
            port,
            state,
            cancel,
        } = self;

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|e| HealthServerError::BindFailed(port, e.to_string()))?;
        tracing::info!(port, "Health server listening");

        axum::serve(listener, routes(state))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

type Shared = State<Arc<HealthServerState>>;

fn routes(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(report))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn report(State(state): Shared) -> Response {
    let report = state.report();
    (report.status.http_status(), Json(report)).into_response()
}

async fn ready(State(state): Shared) -> Response {
    match state.stocks.state() {
        ConnectionState::Streaming => (StatusCode::OK, "READY").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response(),
    }
}

async fn metrics() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::NoOpDecisionSink;
    use crate::infrastructure::metrics::Feed;

    fn shared() -> Arc<HealthServerState> {
        Arc::new(HealthServerState::new(
            "9.9.9".to_string(),
            Arc::new(FeedState::new(Feed::Stocks)),
            Arc::new(FeedState::new(Feed::News)),
            Arc::new(NoOpDecisionSink),
        ))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn rollup_depends_on_prices_first() {
        assert_eq!(HealthStatus::rollup(false, true), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::rollup(true, false), HealthStatus::Degraded);
        assert_eq!(HealthStatus::rollup(true, true), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn report_is_503_until_prices_stream() {
        let state = shared();
        let app = routes(Arc::clone(&state));

        let (status, body) = get(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["version"], "9.9.9");
        assert_eq!(json["stocks"]["state"], "disconnected");

        state.stocks.set_state(ConnectionState::Streaming);
        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["stocks"]["streaming"], true);
    }

    #[tokio::test]
    async fn readiness_tracks_the_price_feed() {
        let state = shared();
        let app = routes(Arc::clone(&state));

        let (status, _) = get(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.stocks.set_state(ConnectionState::Streaming);
        let (status, body) = get(app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"READY");
    }

    #[tokio::test]
    async fn liveness_ignores_feeds() {
        let (status, body) = get(routes(shared()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }
}
