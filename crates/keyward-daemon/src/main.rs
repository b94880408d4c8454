//! Keyward Daemon
//!
//! Terminates mTLS, authenticates each request as the client certificate's
//! user and forwards it upstream.

use std::sync::Arc;

use keyward::{CredentialCache, ImpersonationClient, RequestMutator};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use keyward_daemon::server::{self, AppState, Server};
use keyward_daemon::{DaemonConfig, Forwarder, ProxyMetrics, Result, tls};

/// Initializes structured logging with tracing.
///
/// Supports two output formats via `KEYWARD_LOG_FORMAT` environment variable:
/// - `json`: Machine-readable JSON logs
/// - `pretty`: Human-readable formatted logs (default)
///
/// Log level is controlled via `RUST_LOG` environment variable.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let format = std::env::var("KEYWARD_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("keyward_daemon=info,keyward=info"));

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting keyward daemon");

    let config = match DaemonConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            error!("Expected config at: {:?}", DaemonConfig::config_path());
            return Err(e);
        }
    };
    let core = config.core_config()?;

    info!(
        upstream = %core.upstream_url,
        identities = config.identities.len(),
        "Loaded configuration"
    );

    let tls_config = match tls::load_server_config(&config.tls) {
        Ok(tls_config) => tls_config,
        Err(e) => {
            error!("Failed to load TLS material: {e}");
            return Err(e);
        }
    };

    let metrics = Arc::new(ProxyMetrics::new()?);
    let issuer = Arc::new(ImpersonationClient::new(&core)?);
    let cache = CredentialCache::new(issuer, &core).with_recorder(metrics.clone());
    let mutator = RequestMutator::new(config.resolver(), Arc::new(cache));
    let forwarder = Forwarder::new(core.upstream_url.clone())?;
    let state = Arc::new(AppState::new(mutator, forwarder, Arc::clone(&metrics)));

    // Create shutdown channel. All receivers exist before the signal task starts.
    let (shutdown_tx, server_shutdown) = broadcast::channel(1);
    let metrics_shutdown = shutdown_tx.subscribe();

    // Set up signal handlers
    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        use futures::stream::StreamExt;
        while let Some(signal) = signals.next().await {
            match signal {
                SIGTERM => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    if shutdown_tx_clone.send(()).is_err() {
                        warn!("No shutdown listeners remain");
                    }
                    break;
                }
                SIGINT => {
                    info!("Received SIGINT, initiating graceful shutdown");
                    if shutdown_tx_clone.send(()).is_err() {
                        warn!("No shutdown listeners remain");
                    }
                    break;
                }
                _ => {}
            }
        }
    });

    let metrics_listener = TcpListener::bind(config.metrics_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = server::serve_metrics(metrics_listener, metrics, metrics_shutdown).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    let listener = TcpListener::bind(config.listen_addr).await?;
    let server = Arc::new(Server::new(state, tls_config, config.purge_interval()));

    info!("Daemon ready");

    server.run(listener, server_shutdown).await?;

    info!("Daemon shutdown complete");

    Ok(())
}
