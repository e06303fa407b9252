//! # Trattoria Middleware
//!
//! Request pipeline and admission guards for the Trattoria service.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → RequestId → Telemetry → RateLimit → Idempotency → Handler
//!                                      │             │           ↓
//! Response ←───────────────────────────┴─────────────┴───────────┘
//! ```
//!
//! | Stage | Middleware  | Purpose                                       |
//! |-------|-------------|-----------------------------------------------|
//! | 1     | Request ID  | Generate request ID (UUID v7)                 |
//! | 2     | Telemetry   | Emit metrics and structured logs              |
//! | 3     | Rate Limit  | Fixed-window budget per client, `429` on excess |
//! | 4     | Idempotency | Replay stored 2xx responses for repeated POSTs |
//!
//! Either guard may short-circuit: the rate limiter with a `429`, the
//! idempotency guard with a replay, a `409` for a key still in flight, or
//! a `503` when its store fails. The handler then never runs.
//!
//! ## Example
//!
//! ```
//! use trattoria_middleware::pipeline::Stage;
//!
//! let stages = Stage::all();
//! assert_eq!(stages[0].name(), "request_id");
//! assert_eq!(stages[3].name(), "idempotency");
//! ```

#![doc(html_root_url = "https://docs.rs/trattoria-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod route;
pub mod stages;
pub mod types;

pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, HandlerFn, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder, Stage};
pub use route::{RoutePredicate, RouteSet};
pub use stages::{
    Decision, IdempotencyGuard, IdempotencyMiddleware, Quota, RateLimitMiddleware,
    RateLimitPolicy, RateLimiter, RequestIdMiddleware, TelemetryMiddleware,
};
pub use types::{body_bytes, Request, Response, ResponseExt};
