//! Logging and OpenTelemetry Tracing
//!
//! Installs the global `tracing` subscriber: an env filter, a text or JSON
//! formatter, and an optional OTLP span exporter.
//!
//! Read from the environment:
//!
//! - `RUST_LOG`: filter directives (falls back to `LOG_LEVEL`, then `info`)
//! - `LOG_FORMAT`: `json` for JSON lines, anything else for text
//! - `OTEL_ENABLED`: `true` to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: service name for traces (default: market-ingest)
//!
//! # Usage
//!
//! ```ignore
//! use market_ingest::infrastructure::telemetry;
//!
//! // Keep the guard alive for the life of the process.
//! let _guard = telemetry::init();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// `service.name` resource attribute unless overridden.
const DEFAULT_SERVICE_NAME: &str = "market-ingest";

/// Local collector gRPC port.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Directives appended to every filter to quiet transport crates.
const QUIET_DIRECTIVES: [&str; 4] = ["hyper=warn", "h2=warn", "tungstenite=warn", "redis=warn"];

/// Flushes and stops the span exporter on drop. Hold it in `main`.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("span exporter did not shut down cleanly: {e}");
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; everything else is text.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Subscriber and exporter settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log line format.
    pub format: LogFormat,
    /// Export spans over OTLP.
    pub otel_enabled: bool,
    /// Collector address.
    pub otlp_endpoint: String,
    /// Reported service name.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Text,
            otel_enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Settings from the variables listed in the module docs.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            otel_enabled: std::env::var("OTEL_ENABLED")
                .is_ok_and(|v| v.trim().eq_ignore_ascii_case("true")),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        for directive in QUIET_DIRECTIVES {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// [`init_with_config`] with [`TelemetryConfig::from_env`].
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install the global subscriber.
///
/// A second call leaves the first subscriber in place. An exporter that
/// cannot be built disables OpenTelemetry and is reported once logging is up.
#[must_use]
pub fn init_with_config(config: &TelemetryConfig) -> TelemetryGuard {
    let (tracer_provider, otel_error) = if config.otel_enabled {
        match build_tracer_provider(config) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        }
    } else {
        (None, None)
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let json = config.format == LogFormat::Json;
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_target(true));
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_target(true)
    });

    let installed = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(text_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init();

    if installed.is_ok()
        && let Some(e) = otel_error
    {
        tracing::warn!(error = %e, "OpenTelemetry exporter unavailable, tracing export disabled");
    }

    TelemetryGuard { tracer_provider }
}

fn build_tracer_provider(
    config: &TelemetryConfig,
) -> Result<SdkTracerProvider, opentelemetry_otlp::ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build())
}
