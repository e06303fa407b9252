//! Telemetry emission stage.
//!
//! Times each request, records the request counter and latency histogram,
//! and writes one structured log line per request.
//!
//! # Pipeline Position
//!
//! Telemetry wraps the admission stages, so rejected and replayed
//! requests are measured too:
//!
//! ```text
//! RequestId → [Telemetry] → RateLimit → Idempotency → Handler
//! ```
//!
//! # Log Fields
//!
//! - `request_id` - Unique request identifier
//! - `client_id` - Rate-limit bucket, when the path is governed
//! - `idempotency_key` - Key in play, when the guard engaged
//! - `http.method`, `http.path`, `http.status_code`
//! - `duration_ms` - Request duration in milliseconds

use crate::{
    context::MiddlewareContext,
    middleware::{BoxFuture, Middleware, Next},
    types::{Request, Response},
};
use std::time::Instant;
use trattoria_telemetry::metrics;

/// Telemetry middleware that emits metrics and logs for every request.
#[derive(Debug, Clone)]
pub struct TelemetryMiddleware {
    service_name: String,
}

/// Telemetry data collected during request processing.
///
/// Stored in the context after the response is produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryData {
    /// The service name.
    pub service_name: String,
    /// The HTTP method.
    pub method: String,
    /// The request path.
    pub path: String,
    /// The HTTP status code.
    pub status_code: u16,
    /// Request duration in milliseconds.
    pub duration_ms: f64,
    /// The request ID.
    pub request_id: String,
    /// The resolved rate-limit client, if any.
    pub client_id: Option<String>,
    /// The idempotency key, if any.
    pub idempotency_key: Option<String>,
}

impl TelemetryMiddleware {
    /// Creates a new telemetry middleware with the given service name.
    #[must_use]
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    fn emit(&self, data: &TelemetryData) {
        tracing::info!(
            service = %data.service_name,
            request_id = %data.request_id,
            client_id = data.client_id.as_deref(),
            idempotency_key = data.idempotency_key.as_deref(),
            http.method = %data.method,
            http.path = %data.path,
            http.status_code = data.status_code,
            duration_ms = data.duration_ms,
            "request completed"
        );
    }
}

impl Default for TelemetryMiddleware {
    fn default() -> Self {
        Self::new("trattoria")
    }
}

impl Middleware for TelemetryMiddleware {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().to_string();
            let path = request.uri().path().to_string();

            let response = next.run(ctx, request).await;

            let duration = start.elapsed();
            let status_code = response.status().as_u16();
            metrics::record_request(&method, status_code, duration);

            let data = TelemetryData {
                service_name: self.service_name.clone(),
                method,
                path,
                status_code,
                duration_ms: duration.as_secs_f64() * 1000.0,
                request_id: ctx.request_id().to_string(),
                client_id: ctx.client_id().map(ToString::to_string),
                idempotency_key: ctx.idempotency_key().map(ToString::to_string),
            };
            self.emit(&data);
            ctx.set_extension(data);

            response
        })
    }
}
