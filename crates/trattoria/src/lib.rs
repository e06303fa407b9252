//! # Trattoria
//!
//! **Restaurant CRUD API with request admission guards**
//!
//! Trattoria serves the `/pratos`, `/chefs`, `/pedidos`, `/bebidas` and
//! `/restaurantes` resources behind two guards:
//!
//! - **Rate limiting** - a fixed-window request budget per client on the
//!   governed paths (`/bebidas` by default), answered with `429` and
//!   `X-RateLimit-*` headers
//! - **Idempotent POST** - a `POST` carrying an `Idempotency-Key` header is
//!   executed once; repeats within the retention window replay the stored
//!   response
//!
//! ## Architecture
//!
//! ```text
//! Request → RequestId → Telemetry → RateLimit → Idempotency → Catalog
//!                                                                ↓
//! Response ←─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trattoria::{config::ConfigLoader, server::ShutdownSignal, Service};
//!
//! let config = ConfigLoader::new().with_optional_file("trattoria.toml")?.load()?;
//! let service = Service::from_config(&config, trattoria::core::SystemClock::shared())?;
//! service.run(ShutdownSignal::with_os_signals()).await?;
//! ```

#![doc(html_root_url = "https://docs.rs/trattoria/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod service;

pub use service::Service;

// Re-export core types
pub use trattoria_core as core;

// Re-export store types
pub use trattoria_store as store;

// Re-export middleware types
pub use trattoria_middleware as middleware;

// Re-export telemetry types
pub use trattoria_telemetry as telemetry;

// Re-export configuration types
pub use trattoria_config as config;

// Re-export server types
pub use trattoria_server as server;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use trattoria::prelude::*;
/// ```
pub mod prelude {
    pub use trattoria_config::{ConfigLoader, TrattoriaConfig};
    pub use trattoria_core::{AdmissionError, Clock, ManualClock, SystemClock};
    pub use trattoria_middleware::{IdempotencyGuard, Pipeline, RateLimitPolicy, RateLimiter};
    pub use trattoria_server::{App, Catalog, CrudHandler, Server, ShutdownSignal, Sweeper};
    pub use trattoria_store::{ClientWindowStore, IdempotencyRecordStore};

    pub use crate::Service;
}
