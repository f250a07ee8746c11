//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Alpaca WebSocket and REST adapters.
pub mod alpaca;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Decision process supervisor.
pub mod pipe;

/// Redis Streams durable publisher.
pub mod publisher;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
