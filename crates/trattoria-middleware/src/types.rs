//! Common types used throughout the middleware pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use trattoria_core::{AdmissionError, ErrorEnvelope};

/// The HTTP request type used in the middleware pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Content type of every body produced by the pipeline itself.
pub const APPLICATION_JSON: &str = "application/json";

/// Extension trait for building responses inside the pipeline.
pub trait ResponseExt {
    /// Creates a JSON response with the given status and raw body.
    fn json(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// Creates a `{"error": ..., "message": ...}` response.
    fn json_error(status: StatusCode, envelope: &ErrorEnvelope) -> Response;

    /// Renders an admission failure with its mapped status and envelope.
    fn admission_error(error: &AdmissionError) -> Response;
}

impl ResponseExt for Response {
    fn json(status: StatusCode, body: impl Into<Bytes>) -> Response {
        let mut response = http::Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        response
    }

    fn json_error(status: StatusCode, envelope: &ErrorEnvelope) -> Response {
        Self::json(status, envelope.to_json_bytes())
    }

    fn admission_error(error: &AdmissionError) -> Response {
        Self::json_error(error.status_code(), &error.envelope())
    }
}

/// Drains a `Full<Bytes>` body.
///
/// `Full` yields its single frame without I/O and cannot fail.
pub async fn body_bytes(body: Full<Bytes>) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}
