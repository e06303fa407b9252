//! Observability for Trattoria.
//!
//! - **Logging**: Structured JSON or pretty logging via `tracing-subscriber`
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `trattoria_requests_total` | Counter | `method`, `status` | Total request count |
//! | `trattoria_request_duration_seconds` | Histogram | `method` | Request latency |
//! | `trattoria_rate_limit_decisions_total` | Counter | `decision` | Rate limiter outcomes |
//! | `trattoria_rate_limit_clients` | Gauge | - | Tracked client windows |
//! | `trattoria_idempotency_outcomes_total` | Counter | `outcome` | Idempotency guard outcomes |
//! | `trattoria_sweep_evictions_total` | Counter | `store` | Entries removed by sweeps |
//!
//! # Example
//!
//! ```rust,ignore
//! use trattoria_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::new("trattoria", "production");
//!
//! init_telemetry(&config)?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        metrics = config.metrics.enabled,
        "telemetry initialized"
    );
    Ok(())
}
