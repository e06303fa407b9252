//! Idempotency stage.
//!
//! Makes `POST` requests that carry an `Idempotency-Key` header safe to
//! retry. The first successful (2xx) response for a key is stored and every
//! later request with the same key receives that stored response instead of
//! running the handler again.
//!
//! ## Per-Request States
//!
//! ```text
//! no key / not POST ──► Inert ──────────────► handler
//! key, record found ──► Replay ─────────────► stored response
//! key, no record    ──► Proceed ──► handler ─┬─► 2xx     ──► Saved
//!                                            └─► non-2xx ──► NotCached
//! ```
//!
//! Requests with the same key are serialized on a per-key async lock held
//! from the lookup until the save, so a concurrent duplicate waits and then
//! replays the first one's response. Waiting is bounded; on timeout the
//! duplicate is refused with `409`.
//!
//! Store I/O runs on the blocking thread pool. Any store failure refuses
//! the request with `503`.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{body_bytes, Request, Response, ResponseExt};
use bytes::Bytes;
use dashmap::DashMap;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::Full;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use trattoria_core::{AdmissionError, AdmissionResult};
use trattoria_store::{IdempotencyRecord, IdempotencyRecordStore, StoreResult, DEFAULT_RECORD_TTL};
use trattoria_telemetry::metrics;

/// Idempotency header names.
pub mod headers {
    /// Client-supplied request key.
    pub const IDEMPOTENCY_KEY: &str = "idempotency-key";
    /// Set to `true` on replayed responses.
    pub const REPLAYED: &str = "x-idempotent-replayed";
    /// Human-readable note about the stored response.
    pub const MESSAGE: &str = "x-idempotency-message";
}

/// Message sent with a replayed response.
pub const REPLAY_MESSAGE: &str =
    "This request was already processed. Returning the stored response.";

/// Default bound on waiting for a concurrent request with the same key.
///
/// Kept below the server's request timeout so a stuck duplicate gets `409`
/// rather than `504`.
pub const DEFAULT_IN_FLIGHT_WAIT: Duration = Duration::from_secs(10);

/// Outcome of [`IdempotencyGuard::before_handler`].
#[derive(Debug)]
pub enum BeforeOutcome {
    /// The guard does not apply to this request.
    Inert,
    /// First request with this key; run the handler, then call
    /// [`IdempotencyGuard::after_handler`].
    Proceed(PendingKey),
    /// A live record exists; return it without running the handler.
    Replay(IdempotencyRecord),
}

/// Outcome of [`IdempotencyGuard::after_handler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterOutcome {
    /// The response was not 2xx and was not stored.
    NotCached,
    /// The response was stored.
    Saved(IdempotencyRecord),
    /// Another writer stored a response for the key first.
    Superseded(IdempotencyRecord),
}

/// A key admitted to the handler, holding its in-flight lock.
#[derive(Debug)]
pub struct PendingKey {
    key: String,
    _lease: KeyLease,
}

impl PendingKey {
    /// The idempotency key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, Default)]
struct KeyLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// Waits up to `wait` for the key's lock.
    ///
    /// The lease exists before the wait starts, so a waiter that times out
    /// or is cancelled still drops its map entry.
    async fn acquire(&self, key: &str, wait: Duration) -> Option<KeyLease> {
        let mut lease = KeyLease {
            key: key.to_string(),
            guard: None,
            locks: Arc::clone(&self.inner),
        };
        let lock = Arc::clone(self.inner.entry(key.to_string()).or_default().value());
        lease.guard = tokio::time::timeout(wait, lock.lock_owned()).await.ok();
        lease.guard.is_some().then_some(lease)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[derive(Debug)]
struct KeyLease {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Other waiters hold their own clone of the lock. A cancelled
        // waiter's pending acquisition is dropped before its lease.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Replays stored responses for repeated `POST` requests.
#[derive(Debug)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyRecordStore>,
    locks: KeyLocks,
    in_flight_wait: Duration,
    saved_message: HeaderValue,
}

impl IdempotencyGuard {
    /// Creates a guard over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyRecordStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::default(),
            in_flight_wait: DEFAULT_IN_FLIGHT_WAIT,
            saved_message: saved_message(DEFAULT_RECORD_TTL),
        }
    }

    /// Sets how long a request waits for another one holding its key.
    #[must_use]
    pub fn with_in_flight_wait(mut self, wait: Duration) -> Self {
        self.in_flight_wait = wait;
        self
    }

    /// Sets the retention advertised on saved responses.
    ///
    /// Should match the TTL the store was opened with.
    #[must_use]
    pub fn with_retention(mut self, ttl: Duration) -> Self {
        self.saved_message = saved_message(ttl);
        self
    }

    /// Returns the record store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdempotencyRecordStore> {
        &self.store
    }

    /// Number of keys currently locked or awaited.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    /// Returns `true` if the guard engages for this method and key.
    #[must_use]
    pub fn applies(method: &Method, key: Option<&str>) -> bool {
        method == Method::POST && key.is_some_and(|k| !k.trim().is_empty())
    }

    /// Looks up `key` before the handler runs.
    ///
    /// Waits for any in-flight request holding the same key first.
    pub async fn before_handler(
        &self,
        method: &Method,
        key: Option<&str>,
    ) -> AdmissionResult<BeforeOutcome> {
        let Some(key) = key.filter(|k| Self::applies(method, Some(*k))) else {
            return Ok(BeforeOutcome::Inert);
        };

        let Some(lease) = self.locks.acquire(key, self.in_flight_wait).await else {
            return Err(AdmissionError::key_in_flight(key));
        };

        let owned = key.to_string();
        let found = self
            .blocking(move |store| store.find(&owned))
            .await?
            .map_err(|err| AdmissionError::store_unavailable(err.to_string()))?;

        Ok(match found {
            Some(record) => BeforeOutcome::Replay(record),
            None => BeforeOutcome::Proceed(PendingKey {
                key: key.to_string(),
                _lease: lease,
            }),
        })
    }

    /// Stores the handler's response if it was successful.
    ///
    /// Releases the key's in-flight lock on return.
    pub async fn after_handler(
        &self,
        pending: PendingKey,
        status: StatusCode,
        body: Bytes,
    ) -> AdmissionResult<AfterOutcome> {
        if !status.is_success() {
            return Ok(AfterOutcome::NotCached);
        }

        let key = pending.key.clone();
        let saved = self
            .blocking(move |store| store.save(&key, status.as_u16(), &body))
            .await?;

        match saved {
            Ok(record) => Ok(AfterOutcome::Saved(record)),
            Err(err) if err.is_conflict() => {
                let key = pending.key.clone();
                let winner = self
                    .blocking(move |store| store.find(&key))
                    .await?
                    .map_err(|err| AdmissionError::store_unavailable(err.to_string()))?;
                winner
                    .map(AfterOutcome::Superseded)
                    .ok_or_else(|| AdmissionError::save_conflict(pending.key.as_str()))
            }
            Err(err) => Err(AdmissionError::store_unavailable(err.to_string())),
        }
    }

    async fn blocking<T, F>(&self, op: F) -> AdmissionResult<StoreResult<T>>
    where
        F: FnOnce(&dyn IdempotencyRecordStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|err| AdmissionError::store_unavailable(format!("store task failed: {err}")))
    }
}

fn saved_message(ttl: Duration) -> HeaderValue {
    let secs = ttl.as_secs();
    let retention = if secs >= 3600 && secs % 3600 == 0 {
        format!("{} hours", secs / 3600)
    } else {
        format!("{secs} seconds")
    };
    HeaderValue::from_str(&format!(
        "Request processed successfully. This response will be stored for {retention}."
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("Request processed successfully."))
}

fn replay_response(record: &IdempotencyRecord, key: &HeaderValue) -> Response {
    let status =
        StatusCode::from_u16(record.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::json(status, record.response_body.clone());
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(headers::REPLAYED),
        HeaderValue::from_static("true"),
    );
    headers.insert(HeaderName::from_static(headers::IDEMPOTENCY_KEY), key.clone());
    headers.insert(
        HeaderName::from_static(headers::MESSAGE),
        HeaderValue::from_static(REPLAY_MESSAGE),
    );
    response
}

/// Pipeline stage wrapping an [`IdempotencyGuard`].
#[derive(Debug, Clone)]
pub struct IdempotencyMiddleware {
    guard: Arc<IdempotencyGuard>,
}

impl IdempotencyMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(guard: Arc<IdempotencyGuard>) -> Self {
        Self { guard }
    }

    /// Returns the wrapped guard.
    #[must_use]
    pub fn guard(&self) -> &Arc<IdempotencyGuard> {
        &self.guard
    }
}

impl Middleware for IdempotencyMiddleware {
    fn name(&self) -> &'static str {
        "idempotency"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let header = request.headers().get(headers::IDEMPOTENCY_KEY).cloned();
            let key = header
                .as_ref()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).trim().to_string());
            let method = request.method().clone();

            let before = match self.guard.before_handler(&method, key.as_deref()).await {
                Ok(before) => before,
                Err(err) => {
                    let outcome = if matches!(err, AdmissionError::KeyInFlight { .. }) {
                        "conflict"
                    } else {
                        "error"
                    };
                    metrics::record_idempotency_outcome(outcome);
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        idempotency_key = key.as_deref().unwrap_or_default(),
                        error = %err,
                        "Idempotency lookup refused request"
                    );
                    return Response::admission_error(&err);
                }
            };

            let (pending, header) = match (before, header) {
                (BeforeOutcome::Proceed(pending), Some(header)) => (pending, header),
                (BeforeOutcome::Replay(record), Some(header)) => {
                    metrics::record_idempotency_outcome("replayed");
                    tracing::info!(
                        request_id = %ctx.request_id(),
                        idempotency_key = %record.key,
                        status = record.status_code,
                        "Replaying stored response"
                    );
                    return replay_response(&record, &header);
                }
                _ => return next.run(ctx, request).await,
            };

            ctx.set_idempotency_key(pending.key());
            metrics::record_idempotency_outcome("new");

            let response = next.run(ctx, request).await;
            let (mut parts, body) = response.into_parts();
            let body = body_bytes(body).await;

            match self
                .guard
                .after_handler(pending, parts.status, body.clone())
                .await
            {
                Ok(AfterOutcome::NotCached) => {
                    metrics::record_idempotency_outcome("skipped");
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        status = parts.status.as_u16(),
                        "Unsuccessful response not stored"
                    );
                }
                Ok(AfterOutcome::Saved(record)) => {
                    metrics::record_idempotency_outcome("saved");
                    tracing::info!(
                        request_id = %ctx.request_id(),
                        idempotency_key = %record.key,
                        status = record.status_code,
                        "Stored response"
                    );
                    parts
                        .headers
                        .insert(HeaderName::from_static(headers::IDEMPOTENCY_KEY), header);
                    parts.headers.insert(
                        HeaderName::from_static(headers::MESSAGE),
                        self.guard.saved_message.clone(),
                    );
                }
                Ok(AfterOutcome::Superseded(winner)) => {
                    metrics::record_idempotency_outcome("conflict");
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        idempotency_key = %winner.key,
                        "Concurrent save won; replaying its response"
                    );
                    return replay_response(&winner, &header);
                }
                Err(err @ AdmissionError::SaveConflict { .. }) => {
                    metrics::record_idempotency_outcome("conflict");
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = %err,
                        "Conflicting record vanished; returning unrecorded response"
                    );
                }
                Err(err) => {
                    metrics::record_idempotency_outcome("error");
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        error = %err,
                        "Failed to store idempotent response"
                    );
                    return Response::admission_error(&err);
                }
            }

            Response::from_parts(parts, Full::new(body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Request as HttpRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trattoria_core::{ErrorEnvelope, ManualClock, SharedClock};
    use trattoria_store::{MemoryRecordStore, StoreError};

    fn memory_store() -> (Arc<ManualClock>, Arc<MemoryRecordStore>) {
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let shared: SharedClock = clock.clone();
        let store = Arc::new(MemoryRecordStore::new(shared, DEFAULT_RECORD_TTL));
        (clock, store)
    }

    fn guard() -> (Arc<MemoryRecordStore>, IdempotencyGuard) {
        let (_clock, store) = memory_store();
        let guard = IdempotencyGuard::new(store.clone());
        (store, guard)
    }

    #[derive(Debug)]
    struct BrokenStore;

    impl IdempotencyRecordStore for BrokenStore {
        fn find(&self, _key: &str) -> StoreResult<Option<IdempotencyRecord>> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        fn save(&self, _key: &str, _status: u16, _body: &[u8]) -> StoreResult<IdempotencyRecord> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        fn sweep_expired(&self) -> StoreResult<usize> {
            Ok(0)
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    /// Reports a conflict on save but never returns the winner.
    #[derive(Debug)]
    struct VanishingStore;

    impl IdempotencyRecordStore for VanishingStore {
        fn find(&self, _key: &str) -> StoreResult<Option<IdempotencyRecord>> {
            Ok(None)
        }

        fn save(&self, key: &str, _status: u16, _body: &[u8]) -> StoreResult<IdempotencyRecord> {
            Err(StoreError::Conflict {
                key: key.to_string(),
            })
        }

        fn sweep_expired(&self) -> StoreResult<usize> {
            Ok(0)
        }

        fn backend(&self) -> &'static str {
            "vanishing"
        }
    }

    fn post(key: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().method(Method::POST).uri("/pratos");
        if let Some(key) = key {
            builder = builder.header(headers::IDEMPOTENCY_KEY, key);
        }
        builder.body(Full::new(Bytes::from(r#"{"nome":"lasanha"}"#))).unwrap()
    }

    fn counting_handler(calls: Arc<AtomicUsize>, status: StatusCode) -> Next<'static> {
        Next::handler(move |_ctx, _req| {
            Box::pin(async move {
                let id = calls.fetch_add(1, Ordering::SeqCst) + 7;
                Response::json(status, format!(r#"{{"id":{id}}}"#))
            })
        })
    }

    #[tokio::test]
    async fn test_inert_without_key_or_for_other_methods() {
        let (_store, guard) = guard();
        assert!(matches!(
            guard.before_handler(&Method::POST, None).await,
            Ok(BeforeOutcome::Inert)
        ));
        assert!(matches!(
            guard.before_handler(&Method::POST, Some("  ")).await,
            Ok(BeforeOutcome::Inert)
        ));
        assert!(matches!(
            guard.before_handler(&Method::PUT, Some("k1")).await,
            Ok(BeforeOutcome::Inert)
        ));
    }

    #[tokio::test]
    async fn test_new_key_then_replay() {
        let (store, guard) = guard();

        let BeforeOutcome::Proceed(pending) =
            guard.before_handler(&Method::POST, Some("k1")).await.unwrap()
        else {
            panic!("expected Proceed");
        };
        assert_eq!(pending.key(), "k1");
        assert_eq!(guard.in_flight(), 1);

        let after = guard
            .after_handler(pending, StatusCode::CREATED, Bytes::from_static(b"{\"id\":7}"))
            .await
            .unwrap();
        assert!(matches!(after, AfterOutcome::Saved(_)));
        assert_eq!(guard.in_flight(), 0);
        assert_eq!(store.len(), 1);

        match guard.before_handler(&Method::POST, Some("k1")).await.unwrap() {
            BeforeOutcome::Replay(record) => {
                assert_eq!(record.status_code, 201);
                assert_eq!(record.response_body, b"{\"id\":7}");
            }
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_response_is_not_cached() {
        let (store, guard) = guard();
        let BeforeOutcome::Proceed(pending) =
            guard.before_handler(&Method::POST, Some("k1")).await.unwrap()
        else {
            panic!("expected Proceed");
        };

        let after = guard
            .after_handler(pending, StatusCode::BAD_REQUEST, Bytes::new())
            .await
            .unwrap();
        assert_eq!(after, AfterOutcome::NotCached);
        assert!(store.is_empty());
        assert!(matches!(
            guard.before_handler(&Method::POST, Some("k1")).await,
            Ok(BeforeOutcome::Proceed(_))
        ));
    }

    #[tokio::test]
    async fn test_in_flight_key_times_out() {
        let (_store, guard) = guard();
        let guard = guard.with_in_flight_wait(Duration::from_millis(20));

        let held = guard.before_handler(&Method::POST, Some("k1")).await.unwrap();
        let second = guard.before_handler(&Method::POST, Some("k1")).await;
        assert_eq!(second.unwrap_err(), AdmissionError::key_in_flight("k1"));

        drop(held);
        assert_eq!(guard.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_key() {
        let (_store, guard) = guard();
        let guard = Arc::new(guard);

        let held = guard.before_handler(&Method::POST, Some("k1")).await.unwrap();
        let waiter = tokio::spawn({
            let guard = Arc::clone(&guard);
            async move { guard.before_handler(&Method::POST, Some("k1")).await.is_ok() }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(guard.in_flight(), 1);

        // The key is handed to the waiter, which is gone before it runs.
        drop(held);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(guard.in_flight(), 0);

        assert!(matches!(
            guard.before_handler(&Method::POST, Some("k1")).await,
            Ok(BeforeOutcome::Proceed(_))
        ));
    }

    #[tokio::test]
    async fn test_waiter_cancelled_while_key_held() {
        let (_store, guard) = guard();
        let guard = Arc::new(guard);

        let held = guard.before_handler(&Method::POST, Some("k1")).await.unwrap();
        let waiter = tokio::spawn({
            let guard = Arc::clone(&guard);
            async move { guard.before_handler(&Method::POST, Some("k1")).await.is_ok() }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(guard.in_flight(), 1);

        drop(held);
        assert_eq!(guard.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_superseded_by_external_writer() {
        let (store, guard) = guard();
        let BeforeOutcome::Proceed(pending) =
            guard.before_handler(&Method::POST, Some("k1")).await.unwrap()
        else {
            panic!("expected Proceed");
        };

        store.save("k1", 201, b"{\"id\":7}").unwrap();

        let after = guard
            .after_handler(pending, StatusCode::CREATED, Bytes::from_static(b"{\"id\":8}"))
            .await
            .unwrap();
        match after {
            AfterOutcome::Superseded(winner) => assert_eq!(winner.response_body, b"{\"id\":7}"),
            other => panic!("expected Superseded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_vanished_winner_is_save_conflict() {
        let guard = IdempotencyGuard::new(Arc::new(VanishingStore));
        let BeforeOutcome::Proceed(pending) =
            guard.before_handler(&Method::POST, Some("k1")).await.unwrap()
        else {
            panic!("expected Proceed");
        };

        let err = guard
            .after_handler(pending, StatusCode::CREATED, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::save_conflict("k1"));
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let guard = IdempotencyGuard::new(Arc::new(BrokenStore));
        let err = guard
            .before_handler(&Method::POST, Some("k1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StoreUnavailable { .. }));
        assert_eq!(guard.in_flight(), 0);
    }

    #[test]
    fn test_saved_message() {
        assert_eq!(
            saved_message(DEFAULT_RECORD_TTL),
            "Request processed successfully. This response will be stored for 24 hours."
        );
        assert_eq!(
            saved_message(Duration::from_secs(90)),
            "Request processed successfully. This response will be stored for 90 seconds."
        );
    }

    #[tokio::test]
    async fn test_middleware_saves_then_replays() {
        let (_store, guard) = guard();
        let middleware = IdempotencyMiddleware::new(Arc::new(guard));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut ctx = MiddlewareContext::new();
        let first = middleware
            .process(
                &mut ctx,
                post(Some("k1")),
                counting_handler(calls.clone(), StatusCode::CREATED),
            )
            .await;
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(first.headers().get(headers::IDEMPOTENCY_KEY).unwrap(), "k1");
        assert!(first.headers().get(headers::MESSAGE).is_some());
        assert!(first.headers().get(headers::REPLAYED).is_none());
        assert_eq!(ctx.idempotency_key(), Some("k1"));
        let first_body = body_bytes(first.into_body()).await;

        let mut ctx = MiddlewareContext::new();
        let second = middleware
            .process(
                &mut ctx,
                post(Some("k1")),
                counting_handler(calls.clone(), StatusCode::CREATED),
            )
            .await;
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(second.headers().get(headers::REPLAYED).unwrap(), "true");
        assert_eq!(second.headers().get(headers::IDEMPOTENCY_KEY).unwrap(), "k1");
        assert_eq!(
            second.headers().get(headers::MESSAGE).unwrap(),
            REPLAY_MESSAGE
        );
        assert_eq!(body_bytes(second.into_body()).await, first_body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_middleware_store_failure_skips_handler() {
        let middleware = IdempotencyMiddleware::new(Arc::new(IdempotencyGuard::new(Arc::new(
            BrokenStore,
        ))));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(
                &mut ctx,
                post(Some("k1")),
                counting_handler(calls.clone(), StatusCode::CREATED),
            )
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let envelope: ErrorEnvelope =
            serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
        assert_eq!(envelope.error, "Service Unavailable");
    }

    #[tokio::test]
    async fn test_middleware_without_key_always_runs_handler() {
        let (store, guard) = guard();
        let middleware = IdempotencyMiddleware::new(Arc::new(guard));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let mut ctx = MiddlewareContext::new();
            let response = middleware
                .process(
                    &mut ctx,
                    post(None),
                    counting_handler(calls.clone(), StatusCode::CREATED),
                )
                .await;
            assert!(response.headers().get(headers::IDEMPOTENCY_KEY).is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_middleware_vanished_winner_returns_own_response() {
        let middleware =
            IdempotencyMiddleware::new(Arc::new(IdempotencyGuard::new(Arc::new(VanishingStore))));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(
                &mut ctx,
                post(Some("k1")),
                counting_handler(calls.clone(), StatusCode::CREATED),
            )
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(headers::REPLAYED).is_none());
        assert!(response.headers().get(headers::MESSAGE).is_none());
        assert_eq!(body_bytes(response.into_body()).await, r#"{"id":7}"#);
    }

    #[tokio::test]
    async fn test_middleware_replays_concurrent_winner() {
        let (store, guard) = guard();
        let middleware = IdempotencyMiddleware::new(Arc::new(guard));
        let mut ctx = MiddlewareContext::new();

        // Another writer stores the key while this handler runs.
        let writer = store.clone();
        let handler = Next::handler(move |_ctx, _req| {
            Box::pin(async move {
                writer.save("k1", 201, br#"{"id":1}"#).unwrap();
                Response::json(StatusCode::CREATED, r#"{"id":7}"#)
            })
        });

        let response = middleware.process(&mut ctx, post(Some("k1")), handler).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(headers::REPLAYED).unwrap(), "true");
        assert_eq!(response.headers().get(headers::IDEMPOTENCY_KEY).unwrap(), "k1");
        assert_eq!(
            response.headers().get(headers::MESSAGE).unwrap(),
            REPLAY_MESSAGE
        );
        assert_eq!(body_bytes(response.into_body()).await, r#"{"id":1}"#);
        assert_eq!(store.find("k1").unwrap().unwrap().response_body, br#"{"id":1}"#);
        assert_eq!(middleware.guard().in_flight(), 0);
    }
}
