//! Prometheus metrics endpoint
//!
//! Exposes relay and admission-gate metrics in Prometheus format.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize metrics (call once at startup)
pub fn init_metrics() -> anyhow::Result<()> {
    PROMETHEUS_HANDLE.get_or_try_init(|| PrometheusBuilder::new().install_recorder())?;
    register_metrics();
    Ok(())
}

fn register_metrics() {
    metrics::describe_counter!(
        "chat_relay_relays_total",
        "Relay invocations by terminal outcome"
    );
    metrics::describe_histogram!(
        "chat_relay_relay_duration_seconds",
        "Relay duration from admission request to terminal state"
    );
    metrics::describe_counter!(
        "chat_relay_upstream_attempts_total",
        "Upstream establishment attempts by result"
    );
    metrics::describe_histogram!(
        "chat_relay_gate_wait_seconds",
        "Time spent waiting for an admission slot"
    );
    metrics::describe_gauge!(
        "chat_relay_gate_in_flight",
        "Admission slots currently held"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record a finished relay
pub fn record_relay(outcome: &str, duration_secs: f64) {
    metrics::counter!("chat_relay_relays_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("chat_relay_relay_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// Record one upstream establishment attempt
pub fn record_upstream_attempt(result: &str) {
    metrics::counter!("chat_relay_upstream_attempts_total", "result" => result.to_string())
        .increment(1);
}

/// Record time spent queued at the admission gate
pub fn record_gate_wait(wait_secs: f64) {
    metrics::histogram!("chat_relay_gate_wait_seconds").record(wait_secs);
}

/// Update the in-flight gauge
pub fn set_gate_in_flight(count: f64) {
    metrics::gauge!("chat_relay_gate_in_flight").set(count);
}
