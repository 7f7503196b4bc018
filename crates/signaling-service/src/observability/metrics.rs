//! Prometheus metric definitions for the signaling service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signaling_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by enums in the code, never by client input:
//! - `message_type`: 7 values (six protocol types plus `unknown`)
//! - `error_type`: bounded by `SignalingError::error_type_label`
//! - `operation`: bounded by `EngineOperation`
//! - `reason`: bounded drop reasons (malformed, invalid_body, serialize, peer_gone)
//! - `actor_type`: 2 values (registry, room)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle for serving
/// `/metrics`.
///
/// Must be called before any metrics are recorded. Message latency buckets
/// target a p99 under 100ms; engine calls dominate that budget.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("signaling_message".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `signaling_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_connections_active").set(count as f64);
}

/// Metric: `signaling_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `signaling_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_actor_mailbox_depth", "actor_type" => actor_type.to_string())
        .set(depth as f64);
}

// ============================================================================
// Message Metrics
// ============================================================================

/// Record one handled inbound message and its processing latency.
///
/// Metrics: `signaling_messages_total`, `signaling_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message(message_type: &'static str, duration: Duration) {
    counter!("signaling_messages_total", "message_type" => message_type).increment(1);
    histogram!("signaling_message_latency_seconds", "message_type" => message_type)
        .record(duration.as_secs_f64());
}

/// Record an inbound or outbound message that was dropped.
///
/// Metric: `signaling_messages_dropped_total`
/// Labels: `reason`
pub fn record_message_dropped(reason: &'static str) {
    counter!("signaling_messages_dropped_total", "reason" => reason).increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Record a failed message.
///
/// Metric: `signaling_errors_total`
/// Labels: `error_type`
pub fn record_error(error_type: &'static str) {
    counter!("signaling_errors_total", "error_type" => error_type).increment(1);
}

/// Record a failed media engine call.
///
/// Metric: `signaling_engine_failures_total`
/// Labels: `operation`
pub fn record_engine_failure(operation: &'static str) {
    counter!("signaling_engine_failures_total", "operation" => operation).increment(1);
}

/// Metric: `signaling_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("signaling_actor_panics_total", "actor_type" => actor_type).increment(1);
}
