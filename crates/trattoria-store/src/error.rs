//! Store error types.

use thiserror::Error;

/// Result type alias using [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by idempotency record stores.
///
/// The window store is purely in-memory and never fails.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A live record already exists for the key.
    #[error("live idempotency record already exists for key {key}")]
    Conflict {
        /// The contested key.
        key: String,
    },

    /// The embedded database failed.
    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    /// A stored row could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A stored row decoded but its contents are invalid.
    #[error("corrupt record for key {key}: {reason}")]
    Corrupt {
        /// Key of the damaged row.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` if this error reports a uniqueness conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

macro_rules! impl_from_redb {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    Self::Database(redb::Error::from(err))
                }
            }
        )*
    };
}

impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
