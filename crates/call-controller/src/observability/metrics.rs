//! Metrics definitions for the Call Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cc_` prefix for Call Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `event`: bounded by signaling event names (~15 values)
//! - `outcome`: resolved, timeout, cancelled
//! - `operation`: bounded by media engine calls (~8 values)
//! - `actor_type`: controller, meeting

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling latency - dominated by media engine calls
        .set_buckets_for_metric(
            Matcher::Prefix("cc_signaling".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set signaling latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Meeting & Room Metrics (Gauges)
// ============================================================================

/// Set the number of meetings with a live actor.
///
/// Metric: `cc_meetings_active`
pub fn set_meetings_active(count: usize) {
    // usize to f64 conversion is safe for realistic meeting counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_meetings_active").set(count as f64);
}

/// Media room created.
///
/// Metric: `cc_rooms_active`
pub fn room_opened() {
    gauge!("cc_rooms_active").increment(1.0);
}

/// Media room destroyed.
pub fn room_closed() {
    gauge!("cc_rooms_active").decrement(1.0);
}

/// Set the number of registered client connections.
///
/// Metric: `cc_clients_connected`
pub fn set_clients_connected(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_clients_connected").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `cc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record how an invitation ended.
///
/// Metric: `cc_invitations_total`
/// Labels: `outcome` (resolved, timeout, cancelled)
pub fn record_invitation_outcome(outcome: &str) {
    counter!("cc_invitations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a notification dropped because the recipient's buffer was full.
///
/// Metric: `cc_notifications_dropped_total`
pub fn record_notification_dropped() {
    counter!("cc_notifications_dropped_total").increment(1);
}

/// Record a failed media engine call.
///
/// Metric: `cc_engine_failures_total`
/// Labels: `operation`
pub fn record_engine_failure(operation: &str) {
    counter!("cc_engine_failures_total", "operation" => operation.to_string()).increment(1);
}

/// Record an actor task that ended by panicking.
///
/// Metric: `cc_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("cc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record signaling event handling latency.
///
/// Metric: `cc_signaling_event_latency_seconds`
/// Labels: `event`, `status` (success, error)
pub fn record_event_latency(event: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    histogram!("cc_signaling_event_latency_seconds",
        "event" => event.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());
}
