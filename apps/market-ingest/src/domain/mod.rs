//! Domain Layer - Rolling statistics, sessions, and event shapes.
//!
//! Everything in this layer is synchronous and free of I/O. Types here are
//! shared by the stream adapters, the fan-out, and the periodic jobs.

/// Per-symbol rolling price and volume windows.
pub mod rolling;

/// Trading-session classification in exchange local time.
pub mod session;

/// Annualized volatility from daily closes.
pub mod volatility;

/// Normalized events and their payload shapes.
pub mod events;
