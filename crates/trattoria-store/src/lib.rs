//! # Trattoria Store
//!
//! State behind the request-admission guards.
//!
//! - [`ClientWindowStore`] - In-memory per-client fixed-window counters
//! - [`IdempotencyRecordStore`] - Keyed store of past responses with expiry
//!   - [`RedbRecordStore`] - Durable, file-backed implementation
//!   - [`MemoryRecordStore`] - Process-local implementation for tests and
//!     ephemeral deployments
//!
//! Both stores read time from an injected [`trattoria_core::Clock`].

#![doc(html_root_url = "https://docs.rs/trattoria-store/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod memory;
mod record;
mod redb_store;
mod window;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryRecordStore;
pub use record::{IdempotencyRecord, IdempotencyRecordStore, DEFAULT_RECORD_TTL};
pub use redb_store::RedbRecordStore;
pub use window::{Acquisition, ClientWindowState, ClientWindowStore};
