//! Ordered middleware pipeline.
//!
//! Requests flow through the stages in insertion order, then to the
//! handler; responses flow back out in reverse.
//!
//! ## Admission Order
//!
//! [`Pipeline::admission`] assembles the standard stage order:
//!
//! 1. **Request ID** - Generate request id (UUID v7)
//! 2. **Telemetry** - Time the request, emit metrics and logs
//! 3. **Rate Limit** - Admit or reject with `429`
//! 4. **Idempotency** - Replay stored responses, store new ones
//!
//! Rate limiting runs before idempotency, so replays count against the
//! client's budget and rejected requests never touch the record store.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::{
    IdempotencyGuard, IdempotencyMiddleware, RateLimitMiddleware, RateLimiter,
    RequestIdMiddleware, TelemetryMiddleware,
};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An immutable, ordered middleware pipeline.
///
/// # Example
///
/// ```ignore
/// use trattoria_middleware::Pipeline;
///
/// let pipeline = Pipeline::admission("trattoria", Some(limiter), Some(guard));
/// let response = pipeline.process(ctx, request, handler).await;
/// ```
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Builds the standard admission pipeline.
    ///
    /// A guard passed as `None` is left out, which disables it.
    #[must_use]
    pub fn admission(
        service_name: &str,
        rate_limiter: Option<Arc<RateLimiter>>,
        idempotency: Option<Arc<IdempotencyGuard>>,
    ) -> Self {
        let mut builder = Self::builder()
            .stage(RequestIdMiddleware::new())
            .stage(TelemetryMiddleware::new(service_name));
        if let Some(limiter) = rate_limiter {
            builder = builder.stage(RateLimitMiddleware::new(limiter));
        }
        if let Some(guard) = idempotency {
            builder = builder.stage(IdempotencyMiddleware::new(guard));
        }
        builder.build()
    }

    /// Processes a request through every stage and then the handler.
    pub async fn process<H>(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(&mut ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all middleware stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of middleware stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// The standard stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: Request ID generation
    RequestId = 1,
    /// Stage 2: Telemetry emission
    Telemetry = 2,
    /// Stage 3: Rate limiting
    RateLimit = 3,
    /// Stage 4: Idempotent replay
    Idempotency = 4,
}

impl Stage {
    /// Returns the stage name, as reported by the middleware.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestId => "request_id",
            Self::Telemetry => "telemetry",
            Self::RateLimit => "rate_limit",
            Self::Idempotency => "idempotency",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 4] {
        [
            Self::RequestId,
            Self::Telemetry,
            Self::RateLimit,
            Self::Idempotency,
        ]
    }
}
