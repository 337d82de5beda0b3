//! Prometheus metric helpers.
//!
//! Every helper writes to the globally installed recorder; with none
//! installed (unit tests) they are no-ops.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle that renders `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder cannot be installed (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // In-queue work is pure memory manipulation; ack waits can reach the timeout
        .set_buckets_for_metric(
            Matcher::Full("party_mutation_duration_seconds".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set mutation duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Metric: `party_parties_active`
/// Labels: none
pub fn set_parties_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("party_parties_active").set(count as f64);
}

/// Metric: `party_members_active`
/// Labels: none
///
/// Counts members in any connection status, reservations included.
pub fn set_members_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("party_members_active").set(count as f64);
}

/// Metric: `party_actor_mailbox_depth`
/// Labels: `actor_type` (registry, party, peer)
pub fn set_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("party_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Record the outcome and in-queue duration of one party operation.
///
/// Metrics: `party_mutations_total`, `party_mutation_duration_seconds`
/// Labels: `operation`, `status` (success or a `PartyError` kind)
pub fn record_mutation(operation: &'static str, status: &'static str, duration: Duration) {
    counter!("party_mutations_total", "operation" => operation, "status" => status).increment(1);
    histogram!("party_mutation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Metric: `party_ack_timeouts_total`
/// Labels: none
pub fn record_ack_timeout() {
    counter!("party_ack_timeouts_total").increment(1);
}

/// Metric: `party_invitations_total`
/// Labels: `backend`, `outcome` (accepted, refused, cancelled, failed)
pub fn record_invitation(backend: &str, outcome: &'static str) {
    counter!("party_invitations_total", "backend" => backend.to_string(), "outcome" => outcome)
        .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_helpers_without_recorder() {
        set_parties_active(3);
        set_members_active(12);
        set_mailbox_depth("party", 4);
        record_mutation("update_settings", "success", Duration::from_millis(2));
        record_ack_timeout();
        record_invitation("generic", "accepted");
    }

    #[test]
    fn test_mutation_counter_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_mutation("kick_player", "unauthorized", Duration::from_millis(1));
            record_mutation("kick_player", "unauthorized", Duration::from_millis(1));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counter = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "party_mutations_total")
            .expect("counter recorded");

        let labels: Vec<(&str, &str)> = counter
            .0
            .key()
            .labels()
            .map(|l| (l.key(), l.value()))
            .collect();
        assert!(labels.contains(&("operation", "kick_player")));
        assert!(labels.contains(&("status", "unauthorized")));
        assert!(matches!(counter.3, DebugValue::Counter(2)));
    }
}
