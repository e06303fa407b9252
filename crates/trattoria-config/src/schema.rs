//! Configuration schema types.
//!
//! Every section rejects unknown fields and fills unset fields with
//! defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Time allowed to read a request body, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    /// Graceful shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Request body read timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30_000
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable metrics collection and export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape listener address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directives (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name for telemetry identification.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment (e.g., "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfigSection {
    /// Converts this section into the runtime telemetry configuration.
    #[must_use]
    pub fn to_telemetry_config(&self) -> trattoria_telemetry::TelemetryConfig {
        let mut logging = match self.logging.format {
            LogFormat::Json => trattoria_telemetry::LogConfig::production(),
            LogFormat::Pretty => trattoria_telemetry::LogConfig::development(),
        };
        logging.enabled = self.logging.enabled;
        logging.level.clone_from(&self.logging.level);
        logging.file_line_info = self.logging.include_location;

        trattoria_telemetry::TelemetryConfig::new(&self.service_name, &self.environment)
            .with_metrics(trattoria_telemetry::MetricsConfig {
                enabled: self.metrics.enabled,
                addr: self.metrics.addr.clone(),
            })
            .with_logging(logging)
    }
}

fn default_service_name() -> String {
    "trattoria".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

/// Rate limiting configuration section.
///
/// Paths are governed when they equal a prefix or continue it at a `/`
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Enable the rate limiter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests admitted per client per window.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Path prefixes the limiter applies to.
    #[serde(default = "default_governed_prefixes")]
    pub governed_prefixes: Vec<String>,

    /// Client identifier used when no forwarding header is present.
    #[serde(default = "default_fallback_client_id")]
    pub fallback_client_id: String,

    /// Seconds between sweeps of stale client windows.
    #[serde(default = "default_window_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: default_limit(),
            window_secs: default_window_secs(),
            governed_prefixes: default_governed_prefixes(),
            fallback_client_id: default_fallback_client_id(),
            sweep_interval_secs: default_window_sweep_interval(),
        }
    }
}

impl RateLimitConfig {
    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Interval between window sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_limit() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    3600
}

fn default_governed_prefixes() -> Vec<String> {
    vec!["/bebidas".to_string()]
}

fn default_fallback_client_id() -> String {
    "default-client".to_string()
}

fn default_window_sweep_interval() -> u64 {
    300
}

/// Where idempotency records are kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordBackend {
    /// Embedded redb database file.
    #[default]
    Redb,
    /// Process memory; records are lost on restart.
    Memory,
}

/// Idempotency configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// Enable the idempotency guard.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Record storage backend.
    #[serde(default)]
    pub backend: RecordBackend,

    /// Database file for the redb backend.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Hours a saved response is replayed for.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Seconds between sweeps of expired records.
    #[serde(default = "default_record_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Milliseconds a request waits for another request holding the same
    /// key before giving up with 409.
    #[serde(default = "default_in_flight_wait")]
    pub in_flight_wait_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: RecordBackend::default(),
            database_path: default_database_path(),
            ttl_hours: default_ttl_hours(),
            sweep_interval_secs: default_record_sweep_interval(),
            in_flight_wait_ms: default_in_flight_wait(),
        }
    }
}

impl IdempotencyConfig {
    /// Record time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }

    /// Interval between record sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Bounded wait for an in-flight key.
    #[must_use]
    pub const fn in_flight_wait(&self) -> Duration {
        Duration::from_millis(self.in_flight_wait_ms)
    }
}

fn default_database_path() -> String {
    "data/idempotency.redb".to_string()
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_record_sweep_interval() -> u64 {
    3600
}

fn default_in_flight_wait() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}
