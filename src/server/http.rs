//! HTTP/1.1 server built on `hyper` and `tokio`
//!
//! # Request flow
//!
//! ```text
//! accept ──▶ connection task ──▶ App::handle
//!                                  ├── Router::resolve
//!                                  ├── instrument_request (server span)
//!                                  │     └── handler (child spans)
//!                                  └── HandlerError ──▶ {"error": ..} response
//! ```
//!
//! # Shutdown
//!
//! When the shutdown future completes the listener stops accepting, open
//! connections finish their in-flight request and close, and connections
//! still busy after the grace period are aborted.

use crate::handlers::{
    method_not_allowed, not_found, Handler, HandlerContext, HandlerError, HttpResponse,
};
use crate::router::{Router, RouterError};
use crate::server::ServerError;
use crate::telemetry::{instrument_request, RequestInfo, Tracer};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long open connections get to finish after shutdown starts
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Largest request body a handler is given
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Routes plus the tracer for request spans
pub struct App {
    router: Router<Handler>,
    tracer: Tracer,
    max_body_bytes: usize,
}

impl App {
    pub fn new(router: Router<Handler>, tracer: Tracer) -> Self {
        Self {
            router,
            tracer,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Override the request body limit; larger bodies are rejected with 400
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Handle one request
    ///
    /// Never fails: routing misses and handler errors become JSON error
    /// responses. Handler errors, panics included, are converted only after
    /// the request span has been closed.
    pub async fn handle<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let resolved = self.router.resolve(&parts.method, parts.uri.path());

        // A known path with the wrong method still names its route.
        let route = match &resolved {
            Ok(matched) => Some(matched.route),
            Err(RouterError::MethodNotAllowed { route, .. }) => Some(*route),
            Err(RouterError::NotFound(_)) => None,
        };

        let info = RequestInfo {
            method: &parts.method,
            uri: &parts.uri,
            headers: &parts.headers,
            route,
        };

        let result = instrument_request(&self.tracer, info, |context| async move {
            let matched = match resolved {
                Ok(matched) => matched,
                Err(RouterError::NotFound(path)) => {
                    debug!(path = %path, "No route for request");
                    return Ok(not_found());
                }
                Err(RouterError::MethodNotAllowed { route, .. }) => {
                    return Ok(method_not_allowed(&self.router.allowed_methods(route)));
                }
            };

            let body = Limited::new(body, self.max_body_bytes)
                .collect()
                .await
                .map_err(|e| HandlerError::Body(e.to_string()))?
                .to_bytes();

            (matched.handler)(HandlerContext {
                tracer: self.tracer.clone(),
                context,
                body,
            })
            .await
        })
        .await;

        result.unwrap_or_else(HandlerError::into_response)
    }
}

/// HTTP server bound to a local address
pub struct HttpServer {
    app: Arc<App>,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_grace: Duration,
}

impl HttpServer {
    /// Bind a server for `app`
    ///
    /// Binds immediately; with port 0 the OS assigns a port, see
    /// [`HttpServer::local_addr`].
    ///
    /// # Arguments
    ///
    /// * `address` - Socket address to listen on, e.g. `0.0.0.0:8000`
    /// * `app` - Routes and tracer
    ///
    /// # Returns
    ///
    /// * `Ok(HttpServer)` - Bound server
    /// * `Err(ServerError::BindError)` - Failed to parse address or bind to port
    pub async fn bind(address: &str, app: App) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address {}: {}", address, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!(address = %local_addr, service = app.tracer().name(), "Server bound");

        Ok(Self {
            app: Arc::new(app),
            listener,
            local_addr,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Override the time open connections get after shutdown starts
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// The address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve connections until `shutdown` completes
    ///
    /// Each connection runs in its own task. Accept and connection errors
    /// are logged and do not stop the server.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(address = %self.local_addr, "Accepting connections");

        let (drain_tx, drain_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let app = Arc::clone(&self.app);
                    let mut drain_rx = drain_rx.clone();

                    connections.spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { Ok::<_, Infallible>(app.handle(req).await) }
                        });

                        let conn = http1::Builder::new().serve_connection(io, service);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = drain_rx.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = result {
                            debug!("Error serving connection from {}: {}", peer_addr, e);
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        info!(open_connections = connections.len(), "Stopped accepting connections");
        let _ = drain_tx.send(true);

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                grace = ?self.shutdown_grace,
                "Aborting connections still open after grace period"
            );
            connections.abort_all();
            // Cancelled request spans close as the tasks are dropped.
            while connections.join_next().await.is_some() {}
        }
    }
}
