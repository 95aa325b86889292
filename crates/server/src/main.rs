//! boring-registry server binary.

use anyhow::{Context, Result};
use boring_core::config::AppConfig;
use boring_server::audit::AuditLog;
use boring_server::auth::Authenticator;
use boring_server::{AppState, create_router, create_telemetry_router, with_read_timeout};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for in-flight requests to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// boring-registry - a Terraform/OpenTofu module and provider registry
#[derive(Parser, Debug)]
#[command(name = "boring-registryd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "BORING_REGISTRY_CONFIG",
        default_value = "config/registry.toml"
    )]
    config: String,
}

fn load_config(path: &str) -> Result<(AppConfig, bool)> {
    let mut figment = Figment::new();
    let has_config_file = std::path::Path::new(path).exists();
    if has_config_file {
        figment = figment.merge(Toml::file(path));
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("BORING_REGISTRY_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok((config, has_config_file))
}

fn init_tracing(config: &AppConfig) {
    let default_filter = config
        .logging
        .filter
        .clone()
        .unwrap_or_else(|| "info,tower_http=info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}

async fn serve_telemetry(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind telemetry listener to {addr}"))?;
    tracing::info!("Telemetry listening on {}", addr);
    axum::serve(listener, create_telemetry_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("telemetry listener failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, has_config_file) = load_config(&args.config)?;
    init_tracing(&config);

    tracing::info!("boring-registry v{}", env!("CARGO_PKG_VERSION"));
    if has_config_file {
        tracing::info!(config_path = %args.config, "configuration loaded from file");
    } else {
        tracing::info!(
            config_path = %args.config,
            "no config file, using defaults and environment"
        );
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    boring_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = boring_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "storage backend connectivity verified");

    let auth = Authenticator::from_config(&config.auth)
        .await
        .context("failed to initialize authentication")?;
    if !auth.is_enabled() {
        tracing::warn!("no authentication configured, all requests are accepted");
    }

    let audit = AuditLog::from_config(&config.audit, storage.clone());
    let state = AppState::new(config.clone(), storage, auth, audit.clone())
        .context("failed to build application state")?;
    if config.mirror.enabled {
        tracing::info!(pull_through = config.mirror.pull_through, "provider mirror enabled");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let wait_shutdown = move || {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    };

    let telemetry = if config.server.telemetry_bind.is_empty() {
        None
    } else {
        let addr: SocketAddr = config
            .server
            .telemetry_bind
            .parse()
            .context("invalid telemetry bind address")?;
        Some(tokio::spawn(serve_telemetry(addr, state.clone(), wait_shutdown())))
    };

    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    let signal = tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let handle = axum_server::Handle::new();
    let shutdown = wait_shutdown();
    let graceful = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        graceful.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    let read_timeout = config.server.read_timeout();
    match (&config.server.tls_cert_file, &config.server.tls_key_file) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .context("failed to load TLS certificate and key")?;
            tracing::info!("Listening on {} (TLS)", addr);
            with_read_timeout(axum_server::bind_rustls(addr, tls), read_timeout)
                .handle(handle)
                .serve(app)
                .await
                .context("server error")?;
        }
        _ => {
            tracing::info!("Listening on {}", addr);
            with_read_timeout(axum_server::bind(addr), read_timeout)
                .handle(handle)
                .serve(app)
                .await
                .with_context(|| format!("failed to serve on {addr}"))?;
        }
    }

    signal.abort();
    if let Some(telemetry) = telemetry {
        match telemetry.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "telemetry listener stopped with an error"),
            Err(e) => tracing::warn!(error = %e, "telemetry task failed"),
            Ok(Ok(())) => {}
        }
    }

    audit.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}
