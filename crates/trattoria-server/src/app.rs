//! Request routing ahead of the admission pipeline.
//!
//! `GET /health` and `GET /metrics` are answered directly. Every other
//! request runs through the [`Pipeline`] and, once admitted, reaches the
//! [`CrudHandler`].

use crate::handler::CrudHandler;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::Full;
use std::sync::Arc;
use trattoria_middleware::{MiddlewareContext, Pipeline, Request, Response, ResponseExt};
use trattoria_telemetry::render_metrics;

const HEALTH_BODY: &str = r#"{"status":"healthy"}"#;

/// The request entry point shared by every connection.
#[derive(Clone)]
pub struct App {
    pipeline: Arc<Pipeline>,
    handler: Arc<dyn CrudHandler>,
}

impl App {
    /// Creates an app that guards `handler` with `pipeline`.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, handler: Arc<dyn CrudHandler>) -> Self {
        Self { pipeline, handler }
    }

    /// Returns the admission pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Produces the response for one request.
    pub async fn handle(&self, request: Request) -> Response {
        if request.method() == Method::GET {
            match request.uri().path() {
                "/health" => return Response::json(StatusCode::OK, HEALTH_BODY),
                "/metrics" => {
                    if let Some(rendered) = render_metrics() {
                        return metrics_response(rendered);
                    }
                }
                _ => {}
            }
        }

        let handler = Arc::clone(&self.handler);
        self.pipeline
            .process(MiddlewareContext::new(), request, move |_ctx, request| {
                Box::pin(async move { handler.handle(request).await })
            })
            .await
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

fn metrics_response(rendered: String) -> Response {
    let mut response = Response::new(Full::new(Bytes::from(rendered)));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
