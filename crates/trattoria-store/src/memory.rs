//! Process-local record store.

use crate::{IdempotencyRecord, IdempotencyRecordStore, StoreError, StoreResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use trattoria_core::SharedClock;

/// Idempotency records held in a concurrent map.
///
/// Records do not survive a restart, so duplicate effects are possible
/// across process lifetimes. Use [`RedbRecordStore`](crate::RedbRecordStore)
/// when that matters.
#[derive(Debug)]
pub struct MemoryRecordStore {
    records: DashMap<String, IdempotencyRecord>,
    clock: SharedClock,
    ttl: Duration,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: SharedClock, ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            ttl,
        }
    }

    /// Number of stored records, live or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IdempotencyRecordStore for MemoryRecordStore {
    fn find(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let now = self.clock.now();
        let live = self.records.get(key).map(|record| record.value().clone());
        match live {
            Some(record) if record.is_expired(now) => {
                self.records.remove_if(key, |_, stored| stored.is_expired(now));
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn save(&self, key: &str, status_code: u16, body: &[u8]) -> StoreResult<IdempotencyRecord> {
        let now = self.clock.now();
        let record = IdempotencyRecord::issue(key, status_code, body, now, self.ttl);
        match self.records.entry(key.to_string()) {
            Entry::Occupied(existing) if !existing.get().is_expired(now) => {
                Err(StoreError::Conflict {
                    key: key.to_string(),
                })
            }
            Entry::Occupied(mut expired) => {
                expired.insert(record.clone());
                Ok(record)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    fn sweep_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        Ok(before.saturating_sub(self.records.len()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
