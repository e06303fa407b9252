//! Durable record store backed by redb.
//!
//! Each record is one row in the `idempotency_records` table, keyed by the
//! idempotency key and holding a JSON-encoded [`StoredRecord`]. redb
//! serializes write transactions, so the liveness check and the insert in
//! [`save`](IdempotencyRecordStore::save) cannot interleave with another
//! writer.

use crate::{IdempotencyRecord, IdempotencyRecordStore, StoreError, StoreResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use trattoria_core::SharedClock;

const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("idempotency_records");

/// On-disk row layout.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    status_code: u16,
    response_body: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StoredRecord {
    fn encode(record: &IdempotencyRecord) -> StoreResult<Vec<u8>> {
        let row = Self {
            status_code: record.status_code,
            response_body: BASE64.encode(&record.response_body),
            created_at: record.created_at,
            expires_at: record.expires_at,
        };
        Ok(serde_json::to_vec(&row)?)
    }

    fn decode(key: &str, bytes: &[u8]) -> StoreResult<IdempotencyRecord> {
        let row: Self = serde_json::from_slice(bytes)?;
        let response_body = BASE64
            .decode(row.response_body.as_bytes())
            .map_err(|err| StoreError::Corrupt {
                key: key.to_string(),
                reason: err.to_string(),
            })?;
        Ok(IdempotencyRecord {
            key: key.to_string(),
            status_code: row.status_code,
            response_body,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Idempotency records persisted in an embedded redb database.
pub struct RedbRecordStore {
    db: Database,
    path: PathBuf,
    clock: SharedClock,
    ttl: Duration,
}

impl std::fmt::Debug for RedbRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRecordStore")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedbRecordStore {
    /// Opens or creates the database at `path`.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>, clock: SharedClock, ttl: Duration) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;

        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(RECORDS_TABLE)?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "opened idempotency database");
        Ok(Self {
            db,
            path,
            clock,
            ttl,
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        let result = match table.get(key)? {
            Some(value) => Some(StoredRecord::decode(key, value.value())?),
            None => None,
        };
        Ok(result)
    }

    /// Deletes `key` if its stored record is still expired at `now`.
    fn purge_if_expired(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let expired = match table.get(key)? {
                Some(value) => StoredRecord::decode(key, value.value())?.is_expired(now),
                None => false,
            };
            if expired {
                table.remove(key)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl IdempotencyRecordStore for RedbRecordStore {
    fn find(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let now = self.clock.now();
        match self.read(key)? {
            Some(record) if record.is_expired(now) => {
                self.purge_if_expired(key, now)?;
                debug!(key, "purged expired idempotency record on lookup");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn save(&self, key: &str, status_code: u16, body: &[u8]) -> StoreResult<IdempotencyRecord> {
        let now = self.clock.now();
        let record = IdempotencyRecord::issue(key, status_code, body, now, self.ttl);
        let encoded = StoredRecord::encode(&record)?;

        let write_txn = self.db.begin_write()?;
        let live = {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let live = match table.get(key)? {
                Some(value) => !StoredRecord::decode(key, value.value())?.is_expired(now),
                None => false,
            };
            if !live {
                table.insert(key, encoded.as_slice())?;
            }
            live
        };

        if live {
            write_txn.abort()?;
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        write_txn.commit()?;
        Ok(record)
    }

    fn sweep_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;

            let mut expired = Vec::new();
            for item in table.iter()? {
                let (key, value) = item?;
                let key = key.value();
                // Unreadable rows are swept too; they can never be replayed.
                let dead = StoredRecord::decode(key, value.value())
                    .map_or(true, |record| record.is_expired(now));
                if dead {
                    expired.push(key.to_string());
                }
            }

            for key in &expired {
                table.remove(key.as_str())?;
            }
            expired.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "redb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_RECORD_TTL;
    use std::sync::Arc;
    use trattoria_core::ManualClock;

    fn open(dir: &tempfile::TempDir, clock: &Arc<ManualClock>) -> RedbRecordStore {
        RedbRecordStore::open(
            dir.path().join("idem.redb"),
            clock.clone(),
            DEFAULT_RECORD_TTL,
        )
        .unwrap()
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let path = dir.path().join("nested/deeper/idem.redb");
        let store = RedbRecordStore::open(&path, clock, DEFAULT_RECORD_TTL).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert!(path.exists());
        assert_eq!(store.backend(), "redb");
    }

    #[test]
    fn test_save_and_find_binary_body() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let store = open(&dir, &clock);

        let body = vec![0u8, 159, 146, 150, b'{', b'}'];
        let saved = store.save("k1", 201, &body).unwrap();
        let found = store.find("k1").unwrap().unwrap();
        assert_eq!(found, saved);
        assert_eq!(found.response_body, body);
    }

    #[test]
    fn test_save_conflict_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let store = open(&dir, &clock);

        store.save("k1", 201, b"first").unwrap();
        assert!(store.save("k1", 200, b"second").unwrap_err().is_conflict());

        let found = store.find("k1").unwrap().unwrap();
        assert_eq!(found.status_code, 201);
        assert_eq!(found.response_body, b"first");
    }

    #[test]
    fn test_expired_record_is_purged_and_replaceable() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let store = open(&dir, &clock);

        store.save("k1", 201, b"old").unwrap();
        clock.advance(DEFAULT_RECORD_TTL + Duration::from_secs(1));

        assert!(store.find("k1").unwrap().is_none());
        assert!(store.read("k1").unwrap().is_none());

        store.save("k1", 201, b"new").unwrap();
        assert_eq!(store.find("k1").unwrap().unwrap().response_body, b"new");
    }

    #[test]
    fn test_sweep_expired() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let store = open(&dir, &clock);

        store.save("a", 201, b"").unwrap();
        clock.advance(Duration::from_secs(7200));
        store.save("b", 201, b"").unwrap();
        clock.advance(DEFAULT_RECORD_TTL - Duration::from_secs(3600));

        assert_eq!(store.sweep_expired().unwrap(), 1);
        assert!(store.read("a").unwrap().is_none());
        assert!(store.find("b").unwrap().is_some());
        assert_eq!(store.sweep_expired().unwrap(), 0);
    }
}
