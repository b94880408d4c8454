//! mTLS proxy server.
//!
//! Accepts TCP connections, completes the TLS handshake with a mandatory
//! client certificate, and serves HTTP/1.1 or HTTP/2 on the connection. Each
//! request is authenticated as the certificate's principal and forwarded
//! upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use keyward::RequestMutator;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::forward::Forwarder;
use crate::metrics::ProxyMetrics;
use crate::tls;

/// Time allowed for a client to complete the TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared request-handling state.
#[derive(Debug)]
pub struct AppState {
    pub mutator: RequestMutator,
    pub forwarder: Forwarder,
    pub metrics: Arc<ProxyMetrics>,
}

impl AppState {
    pub const fn new(
        mutator: RequestMutator,
        forwarder: Forwarder,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            mutator,
            forwarder,
            metrics,
        }
    }
}

/// Builds the proxy router. Every path and method is forwarded.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_metrics,
        ))
        .with_state(state)
}

async fn proxy_handler(State(state): State<Arc<AppState>>, mut request: Request) -> Response {
    let outcome = state.mutator.authenticate(&mut request).await;
    state.metrics.record_auth_outcome(outcome.label());

    match state.forwarder.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Upstream request failed");
            e.into_response()
        }
    }
}

async fn track_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .metrics
        .observe_request(response.status(), start.elapsed());
    response
}

/// The TLS-terminating proxy server.
pub struct Server {
    state: Arc<AppState>,
    app: Router,
    acceptor: TlsAcceptor,
    purge_interval: Duration,
}

impl Server {
    /// Creates a new server.
    pub fn new(
        state: Arc<AppState>,
        tls_config: Arc<ServerConfig>,
        purge_interval: Duration,
    ) -> Self {
        Self {
            app: router(Arc::clone(&state)),
            state,
            acceptor: TlsAcceptor::from(tls_config),
            purge_interval,
        }
    }

    /// Accepts connections on `listener` until `shutdown_rx` fires.
    ///
    /// Subscribe `shutdown_rx` before spawning this future, or a shutdown
    /// sent in between is missed.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Proxy listening");

        let purger = tokio::spawn(Arc::clone(&self).purge_expired());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        purger.abort();
        Ok(())
    }

    /// Handles one client connection from handshake to close.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.acceptor.accept(stream)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
            Err(_) => {
                warn!(peer = %peer, "TLS handshake timed out");
                return;
            }
        };

        let identity = tls::peer_identity(stream.get_ref().1);
        debug!(peer = %peer, identity = ?identity, "Client connected");

        let app = match identity {
            Some(identity) => self.app.clone().layer(Extension(identity)),
            None => self.app.clone(),
        };

        let service = TowerToHyperService::new(app);
        if let Err(e) = auto::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            debug!(peer = %peer, error = %e, "Connection closed with error");
        }
    }

    /// Periodically drops expired credentials. Aborted when `run` returns.
    async fn purge_expired(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.purge_interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = self.state.mutator.cache().purge_expired();
            if removed > 0 {
                debug!(removed, "Purged expired credentials");
            }
        }
    }
}

/// Serves the metrics router on `listener` until `shutdown_rx` fires.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<ProxyMetrics>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Metrics listening");

    axum::serve(listener, metrics.router())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    Ok(())
}
