//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Settings for logging and metrics together.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Reported as the `service` field of the startup log line.
    pub service_name: String,

    /// Deployment environment, e.g. `production`.
    pub environment: String,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Subscriber settings.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Production logging and metrics for `service_name` in `environment`.
    #[must_use]
    pub fn new(service_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            environment: environment.into(),
            metrics: MetricsConfig::default(),
            logging: LogConfig::production(),
        }
    }

    /// Replaces the logging settings.
    #[must_use]
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Replaces the metrics settings.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new("trattoria", "development")
    }
}
