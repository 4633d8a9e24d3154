//! HTTP server exposing the engine to an external UI.
//!
//! - [`api`]: Request/response types and route handlers
//! - [`metrics`]: Prometheus registry rendered at `/metrics`

pub mod api;
pub mod metrics;
