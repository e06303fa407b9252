//! Rate limiting stage.
//!
//! Enforces a fixed-window request budget per client on the governed
//! routes. Requests to other routes pass through untouched.
//!
//! ## Algorithm
//!
//! Each client owns a window `(request_count, window_start)` in the shared
//! [`ClientWindowStore`]. When a governed request arrives:
//!
//! 1. A window at least one window length old is reset to `(0, now)`
//! 2. If fewer than `limit` requests were counted, one slot is taken
//! 3. Otherwise the request is rejected and the count is left alone
//!
//! All three steps happen under the client's entry lock, so concurrent
//! requests from one client can never overshoot the limit.
//!
//! ## Client Identity
//!
//! The first entry of `X-Forwarded-For`, else `X-Real-IP`, else a shared
//! fallback bucket.
//!
//! ## Example
//!
//! ```ignore
//! use trattoria_middleware::stages::rate_limit::{RateLimiter, RateLimitPolicy};
//!
//! let limiter = RateLimiter::new(store, RateLimitPolicy::default());
//! let decision = limiter.admit("203.0.113.9", "/bebidas");
//! assert!(decision.is_allowed());
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::route::RouteSet;
use crate::types::{Request, Response, ResponseExt};
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use trattoria_core::AdmissionError;
use trattoria_store::ClientWindowStore;
use trattoria_telemetry::metrics;

/// Rate limit header names.
pub mod headers {
    /// Maximum requests allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Remaining requests in current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Unix timestamp when the window resets.
    pub const RESET: &str = "x-ratelimit-reset";
    /// Seconds to wait before retrying (on 429).
    pub const RETRY_AFTER: &str = "retry-after";
    /// Proxy-supplied client address chain.
    pub const FORWARDED_FOR: &str = "x-forwarded-for";
    /// Proxy-supplied client address.
    pub const REAL_IP: &str = "x-real-ip";
}

/// Bucket shared by clients that send no identifying header.
pub const DEFAULT_FALLBACK_CLIENT_ID: &str = "default-client";

/// Rate limiting parameters.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Maximum admitted requests per client per window.
    pub limit: u32,
    /// Routes the limit applies to.
    pub routes: RouteSet,
    /// Client id used when no identifying header is present.
    pub fallback_client_id: String,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            routes: RouteSet::prefixes(["/bebidas"]),
            fallback_client_id: DEFAULT_FALLBACK_CLIENT_ID.to_string(),
        }
    }
}

/// Budget snapshot attached to a governed decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Configured limit.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

impl Quota {
    /// Window end as Unix seconds.
    #[must_use]
    pub fn reset_epoch_secs(&self) -> u64 {
        u64::try_from(self.reset_at.timestamp()).unwrap_or(0)
    }
}

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The path is not rate limited.
    Ungoverned,
    /// A slot was taken.
    Admitted(Quota),
    /// The window is exhausted.
    Rejected {
        /// Budget at the time of rejection; `remaining` is always 0.
        quota: Quota,
        /// Time left until the window resets.
        retry_after: Duration,
    },
}

impl Decision {
    /// Returns `true` unless the request was rejected.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Returns the budget snapshot for governed decisions.
    #[must_use]
    pub const fn quota(&self) -> Option<&Quota> {
        match self {
            Self::Ungoverned => None,
            Self::Admitted(quota) | Self::Rejected { quota, .. } => Some(quota),
        }
    }

    /// Returns the wait before a retry can succeed, for rejections.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Rejected { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Metric label for this decision.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ungoverned => "ungoverned",
            Self::Admitted(_) => "admitted",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Rounds a wait up to whole seconds, never below one.
#[must_use]
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Fixed-window limiter over a shared [`ClientWindowStore`].
#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<ClientWindowStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    /// Creates a limiter applying `policy` to windows kept in `store`.
    #[must_use]
    pub fn new(store: Arc<ClientWindowStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    /// Returns the backing window store.
    #[must_use]
    pub fn store(&self) -> &Arc<ClientWindowStore> {
        &self.store
    }

    /// Returns the active policy.
    #[must_use]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Returns `true` if `path` is subject to the limit.
    #[must_use]
    pub fn governs(&self, path: &str) -> bool {
        self.policy.routes.matches(path)
    }

    /// Decides whether `client_id` may make a request to `path` now.
    ///
    /// Admission takes a slot; rejection does not.
    pub fn admit(&self, client_id: &str, path: &str) -> Decision {
        if !self.governs(path) {
            return Decision::Ungoverned;
        }

        let limit = self.policy.limit;
        let acquisition = self.store.try_acquire(client_id, limit);
        let reset_at = chrono::TimeDelta::from_std(self.store.window())
            .ok()
            .and_then(|span| acquisition.state.window_start.checked_add_signed(span))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if acquisition.admitted {
            Decision::Admitted(Quota {
                limit,
                remaining: limit.saturating_sub(acquisition.state.request_count),
                reset_at,
            })
        } else {
            let retry_after = (reset_at - acquisition.observed_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            Decision::Rejected {
                quota: Quota {
                    limit,
                    remaining: 0,
                    reset_at,
                },
                retry_after,
            }
        }
    }

    /// Resolves the rate-limit bucket for a request.
    #[must_use]
    pub fn resolve_client_id(&self, headers: &HeaderMap) -> String {
        resolve_client_id(headers, &self.policy.fallback_client_id)
    }

    /// Adds the limit, remaining and reset headers for a governed decision.
    ///
    /// Rejections also get `Retry-After`. Ungoverned decisions leave the
    /// response untouched.
    pub fn annotate_response(&self, decision: &Decision, response: &mut Response) {
        let Some(quota) = decision.quota() else {
            return;
        };
        let headers = response.headers_mut();
        headers.insert(
            HeaderName::from_static(headers::LIMIT),
            HeaderValue::from(quota.limit),
        );
        headers.insert(
            HeaderName::from_static(headers::REMAINING),
            HeaderValue::from(quota.remaining),
        );
        headers.insert(
            HeaderName::from_static(headers::RESET),
            HeaderValue::from(quota.reset_epoch_secs()),
        );
        if let Some(wait) = decision.retry_after() {
            headers.insert(
                HeaderName::from_static(headers::RETRY_AFTER),
                HeaderValue::from(retry_after_secs(wait)),
            );
        }
    }

    /// Builds the 429 response for a rejection.
    #[must_use]
    pub fn rejection_response(&self, decision: &Decision) -> Response {
        let wait = decision.retry_after().unwrap_or(Duration::ZERO);
        let error = AdmissionError::rejected(retry_after_secs(wait));
        let mut response = Response::admission_error(&error);
        self.annotate_response(decision, &mut response);
        response
    }
}

/// Picks the client identifier from proxy headers.
///
/// A blank first `X-Forwarded-For` entry counts as absent.
#[must_use]
pub fn resolve_client_id(headers: &HeaderMap, fallback: &str) -> String {
    let forwarded = headers
        .get(headers::FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(client) = forwarded {
        return client.to_string();
    }

    headers
        .get(headers::REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Pipeline stage wrapping a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    /// Returns the wrapped limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let path = request.uri().path().to_string();
            if !self.limiter.governs(&path) {
                metrics::record_rate_limit_decision("ungoverned");
                return next.run(ctx, request).await;
            }

            let client_id = self.limiter.resolve_client_id(request.headers());
            let decision = self.limiter.admit(&client_id, &path);
            metrics::record_rate_limit_decision(decision.label());
            metrics::set_rate_limit_clients(self.limiter.store().len());
            ctx.set_client_id(client_id.as_str());

            match &decision {
                Decision::Rejected { quota, retry_after } => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        client_id = %client_id,
                        path = %path,
                        limit = quota.limit,
                        retry_after_secs = retry_after_secs(*retry_after),
                        "Rate limit exceeded"
                    );
                    self.limiter.rejection_response(&decision)
                }
                _ => {
                    if let Some(quota) = decision.quota() {
                        tracing::debug!(
                            request_id = %ctx.request_id(),
                            client_id = %client_id,
                            path = %path,
                            remaining = quota.remaining,
                            "Request admitted"
                        );
                    }
                    let mut response = next.run(ctx, request).await;
                    self.limiter.annotate_response(&decision, &mut response);
                    response
                }
            }
        })
    }
}
