//! Idempotency records and the store contract.

use crate::StoreResult;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt::Debug;
use std::time::Duration;

/// How long a saved response is replayed for.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A stored response for one idempotency key.
///
/// Records are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Client-supplied key.
    pub key: String,
    /// HTTP status of the original response.
    pub status_code: u16,
    /// Original response payload, uninterpreted.
    pub response_body: Vec<u8>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the record stops being replayed.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub(crate) fn issue(
        key: &str,
        status_code: u16,
        body: &[u8],
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            key: key.to_string(),
            status_code,
            response_body: body.to_vec(),
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Returns `true` once `now` is past `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Keyed store of past responses.
///
/// Implementations may block on I/O. Async callers should run them on a
/// blocking thread.
pub trait IdempotencyRecordStore: Send + Sync + Debug + 'static {
    /// Returns the live record for `key`.
    ///
    /// An expired record is deleted as part of the lookup and reported as
    /// absent.
    fn find(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>>;

    /// Stores a new record expiring one TTL from now.
    ///
    /// Fails with [`StoreError::Conflict`](crate::StoreError::Conflict) if a
    /// live record for `key` exists. An expired record is replaced.
    fn save(&self, key: &str, status_code: u16, body: &[u8]) -> StoreResult<IdempotencyRecord>;

    /// Deletes every expired record, returning how many were removed.
    fn sweep_expired(&self) -> StoreResult<usize>;

    /// Short backend name for logs and metrics.
    fn backend(&self) -> &'static str;
}
