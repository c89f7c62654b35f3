//! Account pool API
//!
//! Single-binary HTTP service over the credential pool:
//! 1. Loads TOML config and API keys
//! 2. Opens the JSON account store
//! 3. Serves import, lifecycle, and selection endpoints over axum

mod auth;
mod config;
mod import;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use account_pool::{AccountStore, HttpRefresher, PoolManager};
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::AuthKeys;
use crate::config::Config;
use crate::routes::{AppState, build_router};

/// Upper bound on in-flight request draining at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting account-pool-api");

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        store_path = %config.pool.store_path.display(),
        users = config.users.len(),
        admin_key = config.admin_api_key.is_some(),
        "configuration loaded"
    );
    if config.admin_api_key.is_none() {
        warn!("no admin API key configured, admin endpoints are unreachable");
    }

    let store = Arc::new(
        AccountStore::load(config.pool.store_path.clone())
            .await
            .context("failed to open account store")?,
    );
    info!(accounts = store.len().await, "account store loaded");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.pool.refresh_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let manager = Arc::new(PoolManager::new(
        store,
        Arc::new(HttpRefresher::new(client)),
        Duration::from_secs(config.pool.safety_margin_secs),
        Duration::from_secs(config.pool.refresh_timeout_secs),
    ));

    let state = AppState {
        manager,
        auth: Arc::new(AuthKeys::from_config(&config)),
        metrics: prometheus_handle,
    };
    let app = build_router(state);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown: stop accepting on SIGTERM/SIGINT, then drain
    // in-flight requests with a bounded timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
