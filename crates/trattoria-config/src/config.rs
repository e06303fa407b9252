//! Top-level configuration type and its builder.

use serde::{Deserialize, Serialize};

use crate::{
    ConfigError, IdempotencyConfig, LogFormat, RateLimitConfig, RecordBackend, ServerConfig,
    TelemetryConfigSection,
};

/// Complete Trattoria server configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use trattoria_config::TrattoriaConfig;
///
/// let config = TrattoriaConfig::default();
/// assert_eq!(config.rate_limit.limit, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct TrattoriaConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,

    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Idempotency configuration.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

impl TrattoriaConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> TrattoriaConfigBuilder {
        TrattoriaConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .server
            .http_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        let rate_limit = &self.rate_limit;
        if rate_limit.enabled {
            if rate_limit.limit == 0 {
                return Err(ConfigError::invalid_value(
                    "rate_limit.limit",
                    "must be at least 1",
                ));
            }
            if rate_limit.window_secs == 0 {
                return Err(ConfigError::invalid_value(
                    "rate_limit.window_secs",
                    "must be at least 1",
                ));
            }
            if let Some(bad) = rate_limit
                .governed_prefixes
                .iter()
                .find(|prefix| !prefix.starts_with('/'))
            {
                return Err(ConfigError::invalid_value(
                    "rate_limit.governed_prefixes",
                    format!("prefix must start with '/': {bad}"),
                ));
            }
            if rate_limit.fallback_client_id.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    "rate_limit.fallback_client_id",
                    "must not be blank",
                ));
            }
        }

        let idempotency = &self.idempotency;
        if idempotency.enabled {
            if idempotency.ttl_hours == 0 {
                return Err(ConfigError::invalid_value(
                    "idempotency.ttl_hours",
                    "must be at least 1",
                ));
            }
            if idempotency.backend == RecordBackend::Redb
                && idempotency.database_path.trim().is_empty()
            {
                return Err(ConfigError::invalid_value(
                    "idempotency.database_path",
                    "must be set when backend is 'redb'",
                ));
            }
            if idempotency.in_flight_wait_ms >= self.server.request_timeout_ms {
                return Err(ConfigError::invalid_value(
                    "idempotency.in_flight_wait_ms",
                    format!(
                        "must be below server.request_timeout_ms ({})",
                        self.server.request_timeout_ms
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, no metrics listener, and
    /// in-memory idempotency records.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config.telemetry.metrics.enabled = false;
        config.telemetry.environment = "development".to_string();

        config.idempotency.backend = RecordBackend::Memory;

        config
    }

    /// Production preset: JSON logs and durable idempotency records.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.environment = "production".to_string();

        config.idempotency.backend = RecordBackend::Redb;

        config
    }
}

/// Builder for [`TrattoriaConfig`].
#[derive(Debug, Default)]
pub struct TrattoriaConfigBuilder {
    server: Option<ServerConfig>,
    telemetry: Option<TelemetryConfigSection>,
    rate_limit: Option<RateLimitConfig>,
    idempotency: Option<IdempotencyConfig>,
}

impl TrattoriaConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Set the rate limiting configuration.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Set the idempotency configuration.
    #[must_use]
    pub fn idempotency(mut self, idempotency: IdempotencyConfig) -> Self {
        self.idempotency = Some(idempotency);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> TrattoriaConfig {
        TrattoriaConfig {
            server: self.server.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
            rate_limit: self.rate_limit.unwrap_or_default(),
            idempotency: self.idempotency.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<TrattoriaConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_field(config: &TrattoriaConfig) -> String {
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrattoriaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_sections() {
        let config = TrattoriaConfig::builder()
            .rate_limit(RateLimitConfig {
                limit: 5,
                ..Default::default()
            })
            .build();
        assert_eq!(config.rate_limit.limit, 5);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_validate_invalid_server_addr() {
        let mut config = TrattoriaConfig::default();
        config.server.http_addr = "nope".to_string();
        assert_eq!(invalid_field(&config), "server.http_addr");
    }

    #[test]
    fn test_validate_metrics_addr_only_when_enabled() {
        let mut config = TrattoriaConfig::default();
        config.telemetry.metrics.addr = "nope".to_string();
        assert_eq!(invalid_field(&config), "telemetry.metrics.addr");

        config.telemetry.metrics.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rate_limit() {
        let mut config = TrattoriaConfig::default();
        config.rate_limit.limit = 0;
        assert_eq!(invalid_field(&config), "rate_limit.limit");

        let mut config = TrattoriaConfig::default();
        config.rate_limit.window_secs = 0;
        assert_eq!(invalid_field(&config), "rate_limit.window_secs");

        let mut config = TrattoriaConfig::default();
        config.rate_limit.governed_prefixes = vec!["bebidas".to_string()];
        assert_eq!(invalid_field(&config), "rate_limit.governed_prefixes");

        config.rate_limit.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_idempotency() {
        let mut config = TrattoriaConfig::default();
        config.idempotency.ttl_hours = 0;
        assert_eq!(invalid_field(&config), "idempotency.ttl_hours");

        let mut config = TrattoriaConfig::default();
        config.idempotency.database_path = "  ".to_string();
        assert_eq!(invalid_field(&config), "idempotency.database_path");

        config.idempotency.backend = RecordBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_in_flight_wait_below_request_timeout() {
        let mut config = TrattoriaConfig::default();
        assert!(config.idempotency.in_flight_wait() < config.server.request_timeout());

        config.idempotency.in_flight_wait_ms = config.server.request_timeout_ms;
        assert_eq!(invalid_field(&config), "idempotency.in_flight_wait_ms");

        config.server.request_timeout_ms += 1;
        assert!(config.validate().is_ok());

        config.idempotency.in_flight_wait_ms = 60_000;
        config.idempotency.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let dev = TrattoriaConfig::development();
        assert_eq!(dev.telemetry.logging.format, LogFormat::Pretty);
        assert_eq!(dev.idempotency.backend, RecordBackend::Memory);
        assert!(dev.validate().is_ok());

        let prod = TrattoriaConfig::production();
        assert_eq!(prod.telemetry.logging.format, LogFormat::Json);
        assert_eq!(prod.idempotency.backend, RecordBackend::Redb);
    }

    #[test]
    fn test_build_validated_failure() {
        let result = TrattoriaConfig::builder()
            .server(ServerConfig {
                http_addr: "invalid".to_string(),
                ..Default::default()
            })
            .build_validated();
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result: Result<TrattoriaConfig, _> = toml::from_str("[authorization]\nenabled = true");
        assert!(result.is_err());
    }
}
