//! Per-client fixed-window counters.
//!
//! Every operation on a client's window runs while holding that client's
//! map shard entry, so reads, resets and increments for one client are
//! serialized and first-touch creation yields exactly one state.
//!
//! A window whose start is at least one window length old is replaced with
//! `(0, now)` before any read or increment observes it.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::time::Duration;
use trattoria_core::SharedClock;

/// Snapshot of one client's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindowState {
    /// Client identifier.
    pub client_id: String,
    /// Requests counted in the current window.
    pub request_count: u32,
    /// When the current window began.
    pub window_start: DateTime<Utc>,
}

/// Result of [`ClientWindowStore::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// Whether a slot was taken.
    pub admitted: bool,
    /// Window state after the attempt.
    pub state: ClientWindowState,
    /// The instant the decision was made at.
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    request_count: u32,
    window_start: DateTime<Utc>,
}

impl Window {
    const fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            request_count: 0,
            window_start: now,
        }
    }

    fn roll_over(&mut self, now: DateTime<Utc>, span: TimeDelta) {
        if now.signed_duration_since(self.window_start) >= span {
            *self = Self::fresh(now);
        }
    }

    fn snapshot(&self, client_id: &str) -> ClientWindowState {
        ClientWindowState {
            client_id: client_id.to_string(),
            request_count: self.request_count,
            window_start: self.window_start,
        }
    }
}

/// Concurrent store of client windows.
///
/// State is process-local and lost on restart.
#[derive(Debug)]
pub struct ClientWindowStore {
    windows: DashMap<String, Window>,
    clock: SharedClock,
    window: Duration,
    span: TimeDelta,
}

impl ClientWindowStore {
    /// Creates an empty store of `window`-long windows reading time from
    /// `clock`.
    #[must_use]
    pub fn new(clock: SharedClock, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            window,
            span: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Returns the clock this store reads from.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Returns the window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Returns the client's current window, creating `(0, now)` on first
    /// touch and rolling an elapsed window over.
    pub fn get_or_create(&self, client_id: &str) -> ClientWindowState {
        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(client_id.to_string())
            .or_insert_with(|| Window::fresh(now));
        entry.roll_over(now, self.span);
        entry.snapshot(client_id)
    }

    /// Adds one request to the client's current window, after rolling an
    /// elapsed window over.
    pub fn increment(&self, client_id: &str) -> ClientWindowState {
        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(client_id.to_string())
            .or_insert_with(|| Window::fresh(now));
        entry.roll_over(now, self.span);
        entry.request_count = entry.request_count.saturating_add(1);
        entry.snapshot(client_id)
    }

    /// Replaces the client's window with `(0, now)`.
    pub fn reset(&self, client_id: &str) -> ClientWindowState {
        let window = Window::fresh(self.clock.now());
        self.windows.insert(client_id.to_string(), window);
        window.snapshot(client_id)
    }

    /// Atomically rolls over an elapsed window, then takes a slot if fewer
    /// than `limit` requests have been counted.
    ///
    /// A refused attempt leaves the count untouched.
    pub fn try_acquire(&self, client_id: &str, limit: u32) -> Acquisition {
        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(client_id.to_string())
            .or_insert_with(|| Window::fresh(now));
        entry.roll_over(now, self.span);

        let admitted = entry.request_count < limit;
        if admitted {
            entry.request_count += 1;
        }

        Acquisition {
            admitted,
            state: entry.snapshot(client_id),
            observed_at: now,
        }
    }

    /// Evicts windows that started at least `max_age` ago.
    ///
    /// Returns the number of evicted clients.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.signed_duration_since(window.window_start) < max_age);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns `true` if no client is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
