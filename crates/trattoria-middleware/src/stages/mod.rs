//! Pipeline stages.
//!
//! 1. [`request_id`] - Generate/propagate request ID
//! 2. [`telemetry`] - Emit metrics and logs
//! 3. [`rate_limit`] - Per-client fixed-window admission
//! 4. [`idempotency`] - Replay stored responses for repeated POSTs

pub mod idempotency;
pub mod rate_limit;
pub mod request_id;
pub mod telemetry;

pub use idempotency::{IdempotencyGuard, IdempotencyMiddleware};
pub use rate_limit::{Decision, Quota, RateLimitMiddleware, RateLimitPolicy, RateLimiter};
pub use request_id::RequestIdMiddleware;
pub use telemetry::{TelemetryData, TelemetryMiddleware};
