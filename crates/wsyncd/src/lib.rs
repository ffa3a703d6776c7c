//! wsync relay daemon — bridges one authoritative 3D-content peer (framed
//! TCP) with any number of browser viewers (WebSocket/JSON).
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Per-entity trailing-edge coalescing of transform edits.
pub mod coalesce;
/// CLI argument parsing and server configuration.
pub mod config;
/// Error types for relay operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Single-slot authoritative peer connection and forwarding.
pub mod peer;
/// Accept loops and shared server state.
pub mod server;
/// Viewer registry and WebSocket connection handling.
pub mod viewers;

pub use server::{run, run_with_shutdown, ServerState};
