//! Application Layer - Use cases and port definitions.
//!
//! Services here turn upstream observations into normalized events and
//! deliver them through ports; adapters live in `infrastructure`.

/// Port interfaces for sinks and REST collaborators.
pub mod ports;

/// Enrichment, fan-out, and periodic jobs.
pub mod services;
