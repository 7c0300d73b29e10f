//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: 3 values (ensure_trigger, provision_and_move, reclaim_if_empty)
//! - `outcome`: bounded by `RcError::kind()` plus `success` and `panic`
//! - `operation`: bounded by gateway operations (~6 values)
//! - `event`: 3 values (tenant_ready, tenant_joined, voice_state)
//!
//! Tenant, member and room identifiers are never used as labels.

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
        // Work items include rate-limit backoff and settle delays, so the
        // buckets reach well past a few seconds
        .set_buckets_for_metric(
            Matcher::Prefix("rc_work_item".to_string()),
            &[
                0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000, 60.000,
            ],
        )
        .map_err(|e| format!("Failed to set work item buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Record a finished work item.
///
/// Metric: `rc_work_items_total`, `rc_work_item_duration_seconds`
/// Labels: `kind`, `outcome`
pub fn record_work_item(kind: &'static str, outcome: &'static str, duration: Duration) {
    counter!("rc_work_items_total", "kind" => kind, "outcome" => outcome).increment(1);
    histogram!("rc_work_item_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}

/// Set the number of items waiting in the work queue.
///
/// Metric: `rc_queue_depth`
pub fn set_queue_depth(depth: usize) {
    // usize to f64 conversion is safe for realistic queue depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_queue_depth").set(depth as f64);
}

/// Record a rate-limit response from the gateway.
///
/// Metric: `rc_rate_limited_total`
/// Labels: `operation`
pub fn record_rate_limited(operation: &'static str) {
    counter!("rc_rate_limited_total", "operation" => operation).increment(1);
}

/// Record a room created for a member.
///
/// Metric: `rc_rooms_created_total`
pub fn record_room_created() {
    counter!("rc_rooms_created_total").increment(1);
}

/// Record a room reclaimed (deleted, or found already deleted).
///
/// Metric: `rc_rooms_reclaimed_total`
pub fn record_room_reclaimed() {
    counter!("rc_rooms_reclaimed_total").increment(1);
}

/// Record a failed mapping write.
///
/// Metric: `rc_persistence_failures_total`
/// Labels: `operation` (put, remove)
pub fn record_persistence_failure(operation: &'static str) {
    counter!("rc_persistence_failures_total", "operation" => operation).increment(1);
}

/// Record an event received from the gateway relay.
///
/// Metric: `rc_events_received_total`
/// Labels: `event`
pub fn record_event_received(event: &'static str) {
    counter!("rc_events_received_total", "event" => event).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_work_item("ensure_trigger", "success", Duration::from_millis(5));
        set_queue_depth(3);
        record_rate_limited("create_room");
        record_room_created();
        record_room_reclaimed();
        record_persistence_failure("put");
        record_event_received("voice_state");
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_work_item("provision_and_move", "success", Duration::from_millis(20));
            record_work_item("provision_and_move", "rate_limited", Duration::from_secs(2));
            record_rate_limited("create_room");
            record_room_created();
            set_queue_depth(7);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let counter_value = |name: &str, labels: &[(&str, &str)]| {
            metrics.iter().find_map(|(key, _, _, value)| {
                let key = key.key();
                let matches = key.name() == name
                    && labels
                        .iter()
                        .all(|(k, v)| key.labels().any(|l| l.key() == *k && l.value() == *v));
                match (matches, value) {
                    (true, DebugValue::Counter(c)) => Some(*c),
                    _ => None,
                }
            })
        };

        assert_eq!(
            counter_value(
                "rc_work_items_total",
                &[("kind", "provision_and_move"), ("outcome", "success")]
            ),
            Some(1)
        );
        assert_eq!(
            counter_value("rc_rate_limited_total", &[("operation", "create_room")]),
            Some(1)
        );
        assert_eq!(counter_value("rc_rooms_created_total", &[]), Some(1));
        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "rc_queue_depth"));
    }
}
