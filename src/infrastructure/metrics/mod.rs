//! Prometheus Metrics Module
//!
//! Provides hub-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket connections
//! - Closed connections by reason (forced evictions included)
//! - Broadcasts by target and outcome
//! - Frames enqueued onto outbound queues

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::presentation::websocket::CloseReason;

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active WebSocket connections gauge
pub static HUB_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "connections_active",
            "Number of registered WebSocket connections",
        )
        .namespace("chat_hub"),
    )
    .expect("Failed to create HUB_CONNECTIONS_ACTIVE metric")
});

/// Closed connections by close reason
pub static HUB_CONNECTIONS_CLOSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "connections_closed_total",
            "Total number of connections torn down",
        )
        .namespace("chat_hub"),
        &["reason"],
    )
    .expect("Failed to create HUB_CONNECTIONS_CLOSED_TOTAL metric")
});

/// Broadcast counter by target ("user", "room") and outcome
pub static HUB_BROADCASTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("broadcasts_total", "Total number of broadcast calls").namespace("chat_hub"),
        &["target", "outcome"], // "dispatched", "abandoned"
    )
    .expect("Failed to create HUB_BROADCASTS_TOTAL metric")
});

/// Frames handed to outbound queues
pub static HUB_FRAMES_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "frames_enqueued_total",
            "Total number of frames enqueued for delivery",
        )
        .namespace("chat_hub"),
    )
    .expect("Failed to create HUB_FRAMES_ENQUEUED_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HUB_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register HUB_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(HUB_CONNECTIONS_CLOSED_TOTAL.clone()))
        .expect("Failed to register HUB_CONNECTIONS_CLOSED_TOTAL");
    registry
        .register(Box::new(HUB_BROADCASTS_TOTAL.clone()))
        .expect("Failed to register HUB_BROADCASTS_TOTAL");
    registry
        .register(Box::new(HUB_FRAMES_ENQUEUED_TOTAL.clone()))
        .expect("Failed to register HUB_FRAMES_ENQUEUED_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record a connection teardown
pub fn record_connection_closed(reason: CloseReason) {
    HUB_CONNECTIONS_CLOSED_TOTAL
        .with_label_values(&[reason.as_str()])
        .inc();
}

/// Helper to record a broadcast call
pub fn record_broadcast(target: &str, outcome: &str) {
    HUB_BROADCASTS_TOTAL
        .with_label_values(&[target, outcome])
        .inc();
}
