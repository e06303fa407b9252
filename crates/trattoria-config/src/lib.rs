//! Typed configuration for Trattoria.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//! request_timeout_ms = 30000
//!
//! [telemetry]
//! service_name = "trattoria"
//! environment = "production"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [rate_limit]
//! limit = 10
//! window_secs = 3600
//! governed_prefixes = ["/bebidas"]
//! fallback_client_id = "default-client"
//!
//! [idempotency]
//! backend = "redb"
//! database_path = "data/idempotency.redb"
//! ttl_hours = 24
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY`, for example:
//!
//! - `TRATTORIA__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `TRATTORIA__RATE_LIMIT__GOVERNED_PREFIXES=/bebidas,/pedidos`
//! - `TRATTORIA__IDEMPOTENCY__BACKEND=memory`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
