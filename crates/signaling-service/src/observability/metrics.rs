//! Metrics definitions for the signaling service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sig_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label value comes from a fixed set in code; room and connection
//! IDs are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling should stay well under 100ms end to end
        .set_buckets_for_metric(
            Matcher::Prefix("sig_message".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of open WebSocket sessions.
///
/// Metric: `sig_connections_active`
pub fn set_connections_active(count: u64) {
    // u64 to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_connections_active").set(count as f64);
}

/// Set the number of live room actors.
///
/// Metric: `sig_rooms_active`
pub fn set_rooms_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_rooms_active").set(count as f64);
}

// ============================================================================
// Message Metrics
// ============================================================================

/// Count one inbound client event.
///
/// Metric: `sig_messages_total`
/// Labels: `message_type` (protocol event name, or `invalid`)
pub fn record_message(message_type: &str) {
    counter!("sig_messages_total", "message_type" => message_type.to_string()).increment(1);
}

/// Record how long handling one inbound event took.
///
/// Metric: `sig_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message_latency(message_type: &str, duration: Duration) {
    histogram!("sig_message_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}

/// Record a negotiation message that could not be delivered.
///
/// Metric: `sig_relay_undeliverable_total`
/// Labels: `reason` (`unknown_target`, `full`, `closed`)
pub fn record_relay_undeliverable(reason: &str) {
    counter!("sig_relay_undeliverable_total", "reason" => reason.to_string()).increment(1);
}

/// Record the result of a join or a host decision.
///
/// Metric: `sig_admissions_total`
/// Labels: `outcome` (host, member, pending, denied, approved, rejected, or an error kind)
pub fn record_admission(outcome: &str) {
    counter!("sig_admissions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a delivery lost because a client mailbox was full or closed.
///
/// Metric: `sig_outbound_dropped_total`
/// Labels: `reason` (`full`, `closed`)
///
/// A steadily rising `full` count means clients are not draining fast enough.
pub fn record_outbound_dropped(reason: &str) {
    counter!("sig_outbound_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record an actor panic event.
///
/// Metric: `sig_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &str) {
    counter!("sig_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These run against the global no-op recorder unless one is installed,
    // which is enough to exercise every call site.

    #[test]
    fn test_set_gauges() {
        set_connections_active(0);
        set_connections_active(250);
        set_rooms_active(0);
        set_rooms_active(40);
    }

    #[test]
    fn test_record_message() {
        record_message("join-room");
        record_message("offer");
        record_message("invalid");
        record_message_latency("join-room", Duration::from_millis(2));
        record_message_latency("ice-candidate", Duration::from_micros(300));
    }

    #[test]
    fn test_record_drop_counters() {
        record_relay_undeliverable("unknown_target");
        record_relay_undeliverable("full");
        record_outbound_dropped("full");
        record_outbound_dropped("closed");
        record_actor_panic("room");
        record_actor_panic("registry");
    }

    #[test]
    fn test_record_admission() {
        for outcome in ["host", "member", "pending", "denied", "approved", "rejected"] {
            record_admission(outcome);
        }
    }

    #[test]
    fn test_metric_names_with_debugging_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_connections_active(3);
            set_rooms_active(1);
            record_message("offer");
            record_message("offer");
            record_relay_undeliverable("unknown_target");
            record_admission("pending");
            record_outbound_dropped("full");
            record_message_latency("offer", Duration::from_millis(1));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let names: Vec<String> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "sig_connections_active",
            "sig_rooms_active",
            "sig_messages_total",
            "sig_relay_undeliverable_total",
            "sig_admissions_total",
            "sig_outbound_dropped_total",
            "sig_message_latency_seconds",
        ] {
            assert!(
                names.iter().any(|name| name == expected),
                "missing metric {expected}, got {names:?}"
            );
        }

        let offers = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "sig_messages_total")
            .map(|(_, _, _, value)| value.clone())
            .unwrap();
        assert_eq!(*offers, DebugValue::Counter(2));
    }
}
