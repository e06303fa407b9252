//! The boundary between the admission pipeline and the CRUD handlers.

use std::sync::Arc;
use trattoria_middleware::{BoxFuture, Request, Response};

/// Handles a request that passed admission.
///
/// Implementations see only admitted requests. The rate limiter and the
/// idempotency guard have already run and will decorate the response on
/// the way out.
pub trait CrudHandler: Send + Sync + 'static {
    /// Produces the response for an admitted request.
    fn handle(&self, request: Request) -> BoxFuture<'_, Response>;
}

impl<T: CrudHandler + ?Sized> CrudHandler for Arc<T> {
    fn handle(&self, request: Request) -> BoxFuture<'_, Response> {
        (**self).handle(request)
    }
}
