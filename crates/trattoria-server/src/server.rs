//! HTTP server implementation.
//!
//! Built on Hyper and Tokio. The server consists of:
//!
//! - TCP listener bound to the configured address
//! - One HTTP/1.1 connection task per accepted socket
//! - Body collection and request handling under a timeout
//! - Graceful shutdown with a bounded drain of open connections
//!
//! # Example
//!
//! ```rust,ignore
//! use trattoria_server::{App, Server};
//!
//! let server = Server::builder()
//!     .http_addr("0.0.0.0:8080")
//!     .app(app)
//!     .build();
//! server.run().await?;
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use trattoria_core::ErrorEnvelope;
use trattoria_middleware::{Response, ResponseExt};

use crate::app::App;
use crate::error::ServerError;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Default bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed for reading a body and for handling a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The Trattoria HTTP server.
pub struct Server {
    http_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    app: App,
}

impl Server {
    /// Creates a server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Returns the configured bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Runs the server until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = ShutdownSignal::with_os_signals();
        self.run_with_shutdown(shutdown).await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .http_addr
            .parse::<SocketAddr>()
            .map_err(|e| ServerError::invalid_address(&self.http_addr, e.to_string()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "server listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let server = Arc::clone(&server);
                            let token = tracker.acquire();
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                let result = server.handle_connection(stream, remote_addr, shutdown).await;
                                // Release the stores before the drain can observe this connection closed.
                                drop(server);
                                if let Err(e) = result {
                                    tracing::debug!(remote = %remote_addr, error = %e, "connection error");
                                }
                                drop(token);
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }

        tracing::info!(
            timeout = ?server.shutdown_timeout,
            active = tracker.active_connections(),
            "waiting for connections to close"
        );

        tokio::select! {
            () = tracker.wait_for_shutdown() => {
                tracing::info!("all connections closed");
            }
            () = tokio::time::sleep(server.shutdown_timeout) => {
                tracing::warn!(
                    active = tracker.active_connections(),
                    "shutdown timeout reached with connections still active"
                );
            }
        }

        tracing::info!("server stopped");
        Ok(())
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let io = TokioIo::new(stream);
        let server = Arc::clone(self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { server.handle_request(req).await }
        });

        let conn = http1::Builder::new().serve_connection(io, service);

        tokio::select! {
            result = conn => result,
            () = shutdown.recv() => {
                tracing::debug!(remote = %remote_addr, "connection closed due to shutdown");
                Ok(())
            }
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response, Infallible> {
        let (parts, body) = req.into_parts();

        let body = match tokio::time::timeout(self.request_timeout, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to read request body");
                return Ok(error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("Failed to read request body: {}", e),
                ));
            }
            Err(_) => {
                tracing::warn!(path = %parts.uri.path(), "request body read timed out");
                return Ok(error_response(
                    StatusCode::REQUEST_TIMEOUT,
                    "Request body was not received in time",
                ));
            }
        };

        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let request = Request::from_parts(parts, Full::new(body));

        match tokio::time::timeout(self.request_timeout, self.app.handle(request)).await {
            Ok(response) => Ok(response),
            Err(_) => {
                tracing::warn!(%method, %path, "request handling timed out");
                Ok(error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    "Request handling timed out",
                ))
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("http_addr", &self.http_addr)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("app", &self.app)
            .finish()
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");
    Response::json_error(status, &ErrorEnvelope::new(reason, message))
}

/// Builder for [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    http_addr: Option<String>,
    shutdown_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    app: Option<App>,
}

impl ServerBuilder {
    /// Sets the bind address.
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = Some(addr.into());
        self
    }

    /// Sets the graceful shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the app that answers requests.
    pub fn app(mut self, app: App) -> Self {
        self.app = Some(app);
        self
    }

    /// Builds the server.
    ///
    /// Without an app, every request is answered by an empty pipeline in
    /// front of the in-memory catalog.
    pub fn build(self) -> Server {
        let app = self.app.unwrap_or_else(|| {
            App::new(
                Arc::new(trattoria_middleware::Pipeline::builder().build()),
                Arc::new(crate::catalog::Catalog::new()),
            )
        });
        Server {
            http_addr: self
                .http_addr
                .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            app,
        }
    }
}
