//! Prometheus metrics.
//!
//! Recording functions are safe to call before [`init_metrics`]; without an
//! installed recorder they are no-ops.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address the Prometheus scrape listener binds to.
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and scrape listener.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "trattoria_requests_total",
        "Total number of HTTP requests processed"
    );
    describe_histogram!(
        "trattoria_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "trattoria_rate_limit_decisions_total",
        "Rate limiter decisions by outcome"
    );
    describe_gauge!(
        "trattoria_rate_limit_clients",
        "Client windows currently tracked by the rate limiter"
    );
    describe_counter!(
        "trattoria_idempotency_outcomes_total",
        "Idempotency guard outcomes"
    );
    describe_counter!(
        "trattoria_sweep_evictions_total",
        "Entries removed by background sweeps"
    );
}

/// Records a completed request.
pub fn record_request(method: &str, status_code: u16, duration: Duration) {
    counter!(
        "trattoria_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "trattoria_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a rate limiter decision.
///
/// `decision` is one of `admitted`, `rejected` or `ungoverned`.
pub fn record_rate_limit_decision(decision: &'static str) {
    counter!("trattoria_rate_limit_decisions_total", "decision" => decision).increment(1);
}

/// Sets the number of tracked client windows.
pub fn set_rate_limit_clients(count: usize) {
    gauge!("trattoria_rate_limit_clients").set(count as f64);
}

/// Records an idempotency guard outcome.
///
/// `outcome` is one of `new`, `replayed`, `saved`, `skipped`, `conflict`
/// or `error`.
pub fn record_idempotency_outcome(outcome: &'static str) {
    counter!("trattoria_idempotency_outcomes_total", "outcome" => outcome).increment(1);
}

/// Records entries evicted by a sweep of `store`.
pub fn record_sweep_evictions(store: &'static str, evicted: usize) {
    counter!("trattoria_sweep_evictions_total", "store" => store).increment(evicted as u64);
}
