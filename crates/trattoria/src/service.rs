//! Wiring from configuration to a running service.

use std::sync::Arc;

use trattoria_config::{RecordBackend, TrattoriaConfig};
use trattoria_core::SharedClock;
use trattoria_middleware::{IdempotencyGuard, Pipeline, RateLimitPolicy, RateLimiter, RouteSet};
use trattoria_server::{App, Catalog, Server, ShutdownSignal, Sweeper};
use trattoria_store::{
    ClientWindowStore, IdempotencyRecordStore, MemoryRecordStore, RedbRecordStore, StoreResult,
};

/// Every long-lived component of one Trattoria process.
#[derive(Debug)]
pub struct Service {
    server: Server,
    sweeper: Sweeper,
    catalog: Arc<Catalog>,
}

impl Service {
    /// Builds the stores, guards, pipeline and server described by `config`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the redb record database cannot be opened.
    pub fn from_config(config: &TrattoriaConfig, clock: SharedClock) -> StoreResult<Self> {
        let mut sweeper = Sweeper::new();

        let rate_limiter = if config.rate_limit.enabled {
            let window = config.rate_limit.window();
            let windows = Arc::new(ClientWindowStore::new(Arc::clone(&clock), window));
            let policy = RateLimitPolicy {
                limit: config.rate_limit.limit,
                routes: RouteSet::prefixes(config.rate_limit.governed_prefixes.iter().cloned()),
                fallback_client_id: config.rate_limit.fallback_client_id.clone(),
            };
            tracing::info!(
                limit = policy.limit,
                window_secs = config.rate_limit.window_secs,
                governed = ?config.rate_limit.governed_prefixes,
                "rate limiter enabled"
            );
            sweeper = sweeper.windows(
                Arc::clone(&windows),
                window,
                config.rate_limit.sweep_interval(),
            );
            Some(Arc::new(RateLimiter::new(windows, policy)))
        } else {
            tracing::info!("rate limiter disabled");
            None
        };

        let idempotency = if config.idempotency.enabled {
            let ttl = config.idempotency.ttl();
            let records: Arc<dyn IdempotencyRecordStore> = match config.idempotency.backend {
                RecordBackend::Redb => Arc::new(RedbRecordStore::open(
                    &config.idempotency.database_path,
                    Arc::clone(&clock),
                    ttl,
                )?),
                RecordBackend::Memory => Arc::new(MemoryRecordStore::new(Arc::clone(&clock), ttl)),
            };
            tracing::info!(
                backend = records.backend(),
                ttl_hours = config.idempotency.ttl_hours,
                "idempotency guard enabled"
            );
            sweeper = sweeper.records(Arc::clone(&records), config.idempotency.sweep_interval());
            let guard = IdempotencyGuard::new(records)
                .with_in_flight_wait(config.idempotency.in_flight_wait())
                .with_retention(ttl);
            Some(Arc::new(guard))
        } else {
            tracing::info!("idempotency guard disabled");
            None
        };

        let pipeline = Pipeline::admission(
            &config.telemetry.service_name,
            rate_limiter,
            idempotency,
        );
        tracing::debug!(stages = ?pipeline.stage_names(), "admission pipeline assembled");

        let catalog = Arc::new(Catalog::new());
        let app = App::new(Arc::new(pipeline), catalog.clone());
        let server = Server::builder()
            .http_addr(config.server.http_addr.clone())
            .shutdown_timeout(config.server.shutdown_timeout())
            .request_timeout(config.server.request_timeout())
            .app(app)
            .build();

        Ok(Self {
            server,
            sweeper,
            catalog,
        })
    }

    /// Returns the server.
    #[must_use]
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Returns the catalog behind the pipeline.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Serves until `shutdown` fires, sweeping in the background.
    ///
    /// # Errors
    ///
    /// Returns the server error that stopped serving.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), trattoria_server::ServerError> {
        let sweeper = self.sweeper.spawn(shutdown.clone());
        let result = self.server.run_with_shutdown(shutdown.clone()).await;

        // Stop the sweeper as well when the server fails to start.
        shutdown.trigger();
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "sweeper task failed");
        }
        result
    }
}
