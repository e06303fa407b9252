//! End-to-end admission pipeline tests.
//!
//! These tests run the standard stage order against a stand-in CRUD
//! handler:
//!
//! 1. Request ID - Generate request ID
//! 2. Telemetry - Metrics emission
//! 3. Rate Limit - Per-client fixed window on `/bebidas`
//! 4. Idempotency - Replay of stored POST responses

use bytes::Bytes;
use http::{Method, Request as HttpRequest, StatusCode};
use http_body_util::Full;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trattoria_core::{Clock, ErrorEnvelope, ManualClock, SharedClock};
use trattoria_middleware::{
    body_bytes,
    context::MiddlewareContext,
    stages::{
        idempotency::headers as idem, rate_limit::headers as limits,
        request_id::REQUEST_ID_HEADER,
    },
    IdempotencyGuard, Pipeline, RateLimitPolicy, RateLimiter, Request, Response, ResponseExt,
    RouteSet,
};
use trattoria_store::{
    ClientWindowStore, IdempotencyRecordStore, MemoryRecordStore, RedbRecordStore,
    DEFAULT_RECORD_TTL,
};

const HOUR: Duration = Duration::from_secs(3600);

struct Harness {
    clock: Arc<ManualClock>,
    pipeline: Arc<Pipeline>,
    created: Arc<AtomicUsize>,
}

impl Harness {
    fn new(limit: u32) -> Self {
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let shared: SharedClock = clock.clone();
        let records = Arc::new(MemoryRecordStore::new(shared, DEFAULT_RECORD_TTL));
        Self::with_records(clock, limit, records)
    }

    fn with_records(
        clock: Arc<ManualClock>,
        limit: u32,
        records: Arc<dyn IdempotencyRecordStore>,
    ) -> Self {
        let shared: SharedClock = clock.clone();
        let limiter = RateLimiter::new(
            Arc::new(ClientWindowStore::new(shared, HOUR)),
            RateLimitPolicy {
                limit,
                routes: RouteSet::prefixes(["/bebidas"]),
                ..RateLimitPolicy::default()
            },
        );
        let guard = IdempotencyGuard::new(records).with_in_flight_wait(Duration::from_secs(5));
        let pipeline = Pipeline::admission(
            "trattoria-test",
            Some(Arc::new(limiter)),
            Some(Arc::new(guard)),
        );

        Self {
            clock,
            pipeline: Arc::new(pipeline),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn send(&self, request: Request) -> Response {
        send(Arc::clone(&self.pipeline), Arc::clone(&self.created), request).await
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

/// Stand-in CRUD handler: POST with a body creates id 7, 8, ...; POST
/// without a body is a 400; anything else lists.
async fn send(pipeline: Arc<Pipeline>, created: Arc<AtomicUsize>, request: Request) -> Response {
    pipeline
        .process(MiddlewareContext::new(), request, move |_ctx, req| {
            Box::pin(async move {
                if req.method() != Method::POST {
                    return Response::json(StatusCode::OK, "[]");
                }
                let body = body_bytes(req.into_body()).await;
                if body.is_empty() {
                    return Response::json(StatusCode::BAD_REQUEST, r#"{"error":"empty"}"#);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                let id = created.fetch_add(1, Ordering::SeqCst) + 7;
                Response::json(StatusCode::CREATED, format!(r#"{{"id":{id},"nome":"agua"}}"#))
            })
        })
        .await
}

fn post(path: &str, client: &str, key: Option<&str>, body: &'static str) -> Request {
    let mut builder = HttpRequest::builder()
        .method(Method::POST)
        .uri(path)
        .header(limits::FORWARDED_FOR, client);
    if let Some(key) = key {
        builder = builder.header(idem::IDEMPOTENCY_KEY, key);
    }
    builder.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap()
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_ten_admitted_then_rejected() {
    let harness = Harness::new(10);

    for expected in (0..10).rev() {
        let response = harness.send(post("/bebidas", "A", None, "{}")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header(&response, limits::LIMIT), Some("10"));
        assert_eq!(
            header(&response, limits::REMAINING),
            Some(expected.to_string().as_str())
        );
    }

    let response = harness.send(post("/bebidas", "A", None, "{}")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, limits::REMAINING), Some("0"));
    let retry_after: u64 = header(&response, limits::RETRY_AFTER).unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 3600);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let envelope: ErrorEnvelope =
        serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    assert_eq!(envelope.error, "Too Many Requests");
    assert_eq!(harness.created(), 10);
}

#[tokio::test]
async fn test_other_clients_unaffected_by_exhaustion() {
    let harness = Harness::new(1);
    harness.send(post("/bebidas", "A", None, "{}")).await;
    assert_eq!(
        harness.send(post("/bebidas", "A", None, "{}")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        harness.send(post("/bebidas", "B", None, "{}")).await.status(),
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn test_window_rollover_readmits() {
    let harness = Harness::new(2);
    harness.send(post("/bebidas", "A", None, "{}")).await;
    harness.send(post("/bebidas", "A", None, "{}")).await;
    assert_eq!(
        harness.send(post("/bebidas", "A", None, "{}")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    harness.clock.advance(HOUR);

    let response = harness.send(post("/bebidas", "A", None, "{}")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header(&response, limits::REMAINING), Some("1"));
    let reset: i64 = header(&response, limits::RESET).unwrap().parse().unwrap();
    assert_eq!(reset, harness.clock.now().timestamp() + 3600);
}

#[tokio::test]
async fn test_ungoverned_paths_are_not_limited() {
    let harness = Harness::new(1);
    for _ in 0..5 {
        let response = harness.send(post("/pratos", "A", None, "{}")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(header(&response, limits::LIMIT).is_none());
    }
}

#[tokio::test]
async fn test_idempotent_replay() {
    let harness = Harness::new(10);

    let first = harness.send(post("/pratos", "A", Some("k1"), "{}")).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(header(&first, idem::IDEMPOTENCY_KEY), Some("k1"));
    assert!(header(&first, idem::MESSAGE).unwrap().contains("24 hours"));
    let first_body = body_bytes(first.into_body()).await;
    assert_eq!(first_body, r#"{"id":7,"nome":"agua"}"#);

    let second = harness.send(post("/pratos", "A", Some("k1"), "{}")).await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(header(&second, idem::REPLAYED), Some("true"));
    assert_eq!(header(&second, idem::IDEMPOTENCY_KEY), Some("k1"));
    assert!(second.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(body_bytes(second.into_body()).await, first_body);

    assert_eq!(harness.created(), 1);
}

#[tokio::test]
async fn test_failed_attempt_is_retryable() {
    let harness = Harness::new(10);

    let failed = harness.send(post("/pratos", "A", Some("k1"), "")).await;
    assert_eq!(failed.status(), StatusCode::BAD_REQUEST);
    assert!(header(&failed, idem::IDEMPOTENCY_KEY).is_none());

    let retried = harness.send(post("/pratos", "A", Some("k1"), "{}")).await;
    assert_eq!(retried.status(), StatusCode::CREATED);
    assert!(header(&retried, idem::REPLAYED).is_none());
    assert_eq!(harness.created(), 1);
}

#[tokio::test]
async fn test_record_expires_after_ttl() {
    let harness = Harness::new(10);
    harness.send(post("/pratos", "A", Some("k1"), "{}")).await;

    harness.clock.advance(DEFAULT_RECORD_TTL);
    let still_live = harness.send(post("/pratos", "A", Some("k1"), "{}")).await;
    assert_eq!(header(&still_live, idem::REPLAYED), Some("true"));

    harness.clock.advance(Duration::from_secs(1));
    let fresh = harness.send(post("/pratos", "A", Some("k1"), "{}")).await;
    assert!(header(&fresh, idem::REPLAYED).is_none());
    assert_eq!(
        body_bytes(fresh.into_body()).await,
        r#"{"id":8,"nome":"agua"}"#
    );
}

#[tokio::test]
async fn test_replays_count_against_rate_limit() {
    let harness = Harness::new(2);
    harness.send(post("/bebidas", "A", Some("k1"), "{}")).await;
    let replay = harness.send(post("/bebidas", "A", Some("k1"), "{}")).await;
    assert_eq!(header(&replay, idem::REPLAYED), Some("true"));
    assert_eq!(header(&replay, limits::REMAINING), Some("0"));

    let rejected = harness.send(post("/bebidas", "A", Some("k1"), "{}")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(header(&rejected, idem::REPLAYED).is_none());
}

#[tokio::test]
async fn test_get_ignores_idempotency_key() {
    let harness = Harness::new(10);
    let request = HttpRequest::builder()
        .method(Method::GET)
        .uri("/pratos")
        .header(idem::IDEMPOTENCY_KEY, "k1")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = harness.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, idem::IDEMPOTENCY_KEY).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_create_once() {
    let harness = Harness::new(100);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&harness.pipeline);
        let created = Arc::clone(&harness.created);
        handles.push(tokio::spawn(async move {
            let response = send(pipeline, created, post("/pratos", "A", Some("k2"), "{}")).await;
            let replayed = header(&response, idem::REPLAYED).is_some();
            let status = response.status();
            (status, replayed, body_bytes(response.into_body()).await)
        }));
    }

    let mut replays = 0;
    for handle in handles {
        let (status, replayed, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, r#"{"id":7,"nome":"agua"}"#);
        replays += usize::from(replayed);
    }

    assert_eq!(harness.created(), 1);
    assert_eq!(replays, 7);
}

#[tokio::test]
async fn test_redb_backed_replay_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotency.redb");
    let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));

    let first_body = {
        let shared: SharedClock = clock.clone();
        let records = RedbRecordStore::open(&path, shared, DEFAULT_RECORD_TTL).unwrap();
        let harness = Harness::with_records(clock.clone(), 10, Arc::new(records));
        let first = harness.send(post("/pratos", "A", Some("k1"), "{}")).await;
        body_bytes(first.into_body()).await
    };

    let shared: SharedClock = clock.clone();
    let records = RedbRecordStore::open(&path, shared, DEFAULT_RECORD_TTL).unwrap();
    let harness = Harness::with_records(clock, 10, Arc::new(records));
    let replay = harness.send(post("/pratos", "A", Some("k1"), "{}")).await;

    assert_eq!(header(&replay, idem::REPLAYED), Some("true"));
    assert_eq!(body_bytes(replay.into_body()).await, first_body);
    assert_eq!(harness.created(), 0);
}

proptest! {
    #[test]
    fn admitted_requests_never_exceed_limit(limit in 1u32..20, attempts in 0usize..40) {
        let clock: SharedClock = Arc::new(ManualClock::at_epoch_secs(0));
        let limiter = RateLimiter::new(
            Arc::new(ClientWindowStore::new(clock, HOUR)),
            RateLimitPolicy { limit, ..RateLimitPolicy::default() },
        );

        let mut last_remaining = limit;
        let mut admitted = 0usize;
        for _ in 0..attempts {
            let decision = limiter.admit("A", "/bebidas");
            let remaining = decision.quota().unwrap().remaining;
            prop_assert!(remaining <= last_remaining);
            last_remaining = remaining;
            if decision.is_allowed() {
                admitted += 1;
            }
        }

        prop_assert_eq!(admitted, attempts.min(limit as usize));
    }
}
