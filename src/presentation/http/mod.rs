//! HTTP Surface
//!
//! Routes for the WebSocket upgrade, health probes and metrics.

pub mod handlers;
pub mod routes;
