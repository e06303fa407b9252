//! # Trattoria Server
//!
//! HTTP front end for the Trattoria restaurant API.
//!
//! - [`Server`] - Hyper HTTP/1.1 server with graceful shutdown
//! - [`App`] - Health and metrics endpoints, then the admission pipeline
//! - [`CrudHandler`] - Boundary to the resource handlers
//! - [`Catalog`] - In-memory store for the restaurant resources
//! - [`Sweeper`] - Background eviction of stale windows and expired records
//!
//! ## Request Flow
//!
//! ```text
//! TCP → hyper → Server::handle_request → App::handle
//!                                         ├─ GET /health, GET /metrics
//!                                         └─ Pipeline → CrudHandler
//! ```

#![doc(html_root_url = "https://docs.rs/trattoria-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
pub mod catalog;
mod error;
mod handler;
mod server;
pub mod shutdown;
pub mod sweeper;

pub use app::App;
pub use catalog::Catalog;
pub use error::ServerError;
pub use handler::CrudHandler;
pub use server::{
    Server, ServerBuilder, DEFAULT_HTTP_ADDR, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use shutdown::{ShutdownSignal, ShutdownReceiver};
pub use sweeper::Sweeper;
