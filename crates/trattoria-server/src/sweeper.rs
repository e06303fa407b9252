//! Background eviction of stale admission state.
//!
//! Two independent jobs run on their own intervals:
//!
//! - **windows**: drops client windows that started more than one rate-limit
//!   window ago. Memory hygiene only; an evicted client simply starts fresh.
//! - **records**: calls [`IdempotencyRecordStore::sweep_expired`] on a
//!   blocking thread.
//!
//! Both stop when the shutdown signal fires.

use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use trattoria_store::{ClientWindowStore, IdempotencyRecordStore};
use trattoria_telemetry::metrics;

#[derive(Debug)]
struct WindowJob {
    store: Arc<ClientWindowStore>,
    max_age: Duration,
    every: Duration,
}

#[derive(Debug)]
struct RecordJob {
    store: Arc<dyn IdempotencyRecordStore>,
    every: Duration,
}

/// Periodic sweeper for the window and record stores.
///
/// # Example
///
/// ```rust,ignore
/// let handle = Sweeper::new()
///     .windows(window_store, Duration::from_secs(3600), Duration::from_secs(300))
///     .records(record_store, Duration::from_secs(3600))
///     .spawn(shutdown.clone());
/// ```
#[derive(Debug, Default)]
pub struct Sweeper {
    windows: Option<WindowJob>,
    records: Option<RecordJob>,
}

impl Sweeper {
    /// Creates a sweeper with no jobs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evicts windows older than `max_age` every `every`.
    #[must_use]
    pub fn windows(
        mut self,
        store: Arc<ClientWindowStore>,
        max_age: Duration,
        every: Duration,
    ) -> Self {
        self.windows = Some(WindowJob {
            store,
            max_age,
            every,
        });
        self
    }

    /// Deletes expired idempotency records every `every`.
    #[must_use]
    pub fn records(mut self, store: Arc<dyn IdempotencyRecordStore>, every: Duration) -> Self {
        self.records = Some(RecordJob { store, every });
        self
    }

    /// Returns `true` if no job is configured.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.windows.is_none() && self.records.is_none()
    }

    /// Runs the configured jobs until `shutdown` fires.
    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let windows = async {
                if let Some(job) = &self.windows {
                    run_every(job.every, &shutdown, move || async move {
                        sweep_windows(&job.store, job.max_age);
                    })
                    .await;
                }
            };
            let records = async {
                if let Some(job) = &self.records {
                    run_every(job.every, &shutdown, move || {
                        sweep_records(Arc::clone(&job.store))
                    })
                    .await;
                }
            };
            tokio::join!(windows, records);
            tracing::debug!("sweeper stopped");
        })
    }
}

async fn run_every<F, Fut>(every: Duration, shutdown: &ShutdownSignal, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future,
{
    // A zero period would make tokio panic.
    let every = every.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop = shutdown.recv();

    loop {
        tokio::select! {
            () = &mut stop => return,
            _ = ticker.tick() => {
                job().await;
            }
        }
    }
}

/// Evicts stale client windows once and returns how many were removed.
pub fn sweep_windows(store: &ClientWindowStore, max_age: Duration) -> usize {
    let evicted = store.sweep(max_age);
    metrics::record_sweep_evictions("windows", evicted);
    metrics::set_rate_limit_clients(store.len());
    if evicted > 0 {
        tracing::debug!(evicted, remaining = store.len(), "swept client windows");
    }
    evicted
}

/// Deletes expired idempotency records once.
///
/// Failures are logged and reported as zero evictions; the next tick
/// tries again.
pub async fn sweep_records(store: Arc<dyn IdempotencyRecordStore>) -> usize {
    let backend = store.backend();
    match tokio::task::spawn_blocking(move || store.sweep_expired()).await {
        Ok(Ok(evicted)) => {
            metrics::record_sweep_evictions("records", evicted);
            if evicted > 0 {
                tracing::debug!(evicted, backend, "swept expired idempotency records");
            }
            evicted
        }
        Ok(Err(err)) => {
            tracing::warn!(error = %err, backend, "idempotency record sweep failed");
            0
        }
        Err(err) => {
            tracing::warn!(error = %err, backend, "idempotency record sweep task failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trattoria_core::{ManualClock, SharedClock};
    use trattoria_store::MemoryRecordStore;

    const HOUR: Duration = Duration::from_secs(3600);

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_epoch_secs(1_700_000_000))
    }

    #[test]
    fn test_sweep_windows_evicts_only_stale() {
        let clock = clock();
        let store = ClientWindowStore::new(clock.clone() as SharedClock, HOUR);
        store.increment("198.51.100.1");
        clock.advance(Duration::from_secs(1800));
        store.increment("198.51.100.2");
        clock.advance(Duration::from_secs(1800));

        assert_eq!(sweep_windows(&store, HOUR), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_or_create("198.51.100.2").request_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_records_removes_expired() {
        let clock = clock();
        let store = Arc::new(MemoryRecordStore::new(clock.clone() as SharedClock, HOUR));
        store.save("k-1", 201, b"{}").unwrap();
        clock.advance(HOUR + Duration::from_secs(1));
        store.save("k-2", 201, b"{}").unwrap();

        assert_eq!(sweep_records(store.clone()).await, 1);
        assert!(store.find("k-1").unwrap().is_none());
        assert!(store.find("k-2").unwrap().is_some());
    }

    #[test]
    fn test_idle_sweeper() {
        assert!(Sweeper::new().is_idle());
        let store = Arc::new(ClientWindowStore::new(clock() as SharedClock, HOUR));
        assert!(!Sweeper::new().windows(store, HOUR, HOUR).is_idle());
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs_and_stops() {
        let clock = clock();
        let windows = Arc::new(ClientWindowStore::new(clock.clone() as SharedClock, HOUR));
        windows.increment("203.0.113.5");
        clock.advance(HOUR * 2);

        let shutdown = ShutdownSignal::new();
        let handle = Sweeper::new()
            .windows(windows.clone(), HOUR, Duration::from_millis(10))
            .spawn(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !windows.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("window should be swept");

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .expect("sweeper should not panic");
    }
}
