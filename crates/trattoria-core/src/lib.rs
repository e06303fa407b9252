//! # Trattoria Core
//!
//! Core types shared by the Trattoria request-admission layer.
//!
//! This crate provides the foundational types used throughout Trattoria:
//!
//! - [`Clock`] - Injected time source ([`SystemClock`], [`ManualClock`])
//! - [`RequestId`] - UUID v7 request identifier
//! - [`AdmissionError`] - Error taxonomy for the rate limiter and idempotency guard

#![doc(html_root_url = "https://docs.rs/trattoria-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod clock;
mod context;
mod error;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use context::RequestId;
pub use error::{AdmissionError, AdmissionResult, ErrorCategory, ErrorEnvelope};
