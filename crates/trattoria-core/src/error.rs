//! Error types for request admission.
//!
//! [`AdmissionError`] is the outcome of a guard refusing to let a request
//! reach its handler. Each variant maps to exactly one HTTP status and one
//! stable [`ErrorEnvelope`] body, so rejected clients always receive a
//! machine-parsable `{"error": ..., "message": ...}` object.
//!
//! A replayed idempotent response is not an error and is therefore not
//! represented here.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`AdmissionError`].
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Categories of admission failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The client exhausted its window.
    RateLimited,
    /// Another request holds the same idempotency key.
    Conflict,
    /// A backing store could not answer.
    Unavailable,
    /// A failure inside the admission layer itself.
    Internal,
}

impl ErrorCategory {
    /// Returns the default HTTP status code for this error category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors raised by the rate limiter and idempotency guard.
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use trattoria_core::AdmissionError;
///
/// let err = AdmissionError::rejected(120);
/// assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
/// assert_eq!(err.envelope().error, "Too Many Requests");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The client exceeded its request budget for the current window.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    Rejected {
        /// Whole seconds until the window resets.
        retry_after_secs: u64,
    },

    /// Two first-time requests raced to save the same idempotency key.
    ///
    /// Normally recovered by replaying the winner's record. Surfaces only
    /// when the winner cannot be read back.
    #[error("Idempotency key {key} was saved concurrently")]
    SaveConflict {
        /// The contested key.
        key: String,
    },

    /// The key is held by a request still being processed.
    #[error("Idempotency key {key} is already being processed")]
    KeyInFlight {
        /// The contested key.
        key: String,
    },

    /// The durable idempotency store failed.
    #[error("Idempotency store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the underlying failure.
        message: String,
    },
}

impl AdmissionError {
    /// Creates a rate-limit rejection.
    #[must_use]
    pub const fn rejected(retry_after_secs: u64) -> Self {
        Self::Rejected { retry_after_secs }
    }

    /// Creates a save conflict error.
    #[must_use]
    pub fn save_conflict(key: impl Into<String>) -> Self {
        Self::SaveConflict { key: key.into() }
    }

    /// Creates a key-in-flight error.
    #[must_use]
    pub fn key_in_flight(key: impl Into<String>) -> Self {
        Self::KeyInFlight { key: key.into() }
    }

    /// Creates a store failure error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected { .. } => ErrorCategory::RateLimited,
            Self::KeyInFlight { .. } => ErrorCategory::Conflict,
            Self::StoreUnavailable { .. } => ErrorCategory::Unavailable,
            Self::SaveConflict { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().default_status_code()
    }

    /// Returns the seconds a client should wait, when applicable.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Rejected { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Builds the JSON body sent to the client.
    ///
    /// Store failure details are logged, never echoed to clients.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            Self::Rejected { .. } => ErrorEnvelope::new(
                "Too Many Requests",
                "Rate limit exceeded. Try again later.",
            ),
            Self::KeyInFlight { .. } => ErrorEnvelope::new(
                "Conflict",
                "A request with this Idempotency-Key is still being processed.",
            ),
            Self::StoreUnavailable { .. } => ErrorEnvelope::new(
                "Service Unavailable",
                "Idempotency store is unavailable. Retry the request later.",
            ),
            Self::SaveConflict { .. } => ErrorEnvelope::new(
                "Internal Server Error",
                "The idempotent response could not be recovered.",
            ),
        }
    }
}

/// Flat JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Short reason phrase.
    pub error: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ErrorEnvelope {
    /// Creates a new envelope.
    #[must_use]
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    /// Serializes the envelope to JSON bytes.
    #[must_use]
    pub fn to_json_bytes(&self) -> Vec<u8> {
        // Two string fields cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
