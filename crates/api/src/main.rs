use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use caselog_api::config::{AppConfig, LogFormat};
use caselog_api::router::build_app_router;
use caselog_api::state::AppState;
use caselog_core::archiver::Archiver;
use caselog_db::PgCaseLogStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "caselog_api=debug,caselog_core=info,caselog_db=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // --- Tracing ---
    init_tracing(config.server.log_format)?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        policy = %config.archiver.policy,
        retry_attempts = config.archiver.retry.max_attempts,
        "Loaded configuration",
    );
    tracing::debug!(db = ?config.db, "Database settings");

    // --- Database ---
    // The pool connects lazily; an unreachable database shows up as a
    // degraded /health, not a failed start.
    let pool = caselog_db::create_pool(&config.db).context("Invalid database settings")?;
    match caselog_db::health_check(&pool).await {
        Ok(()) => tracing::info!("Database health check passed"),
        Err(e) => tracing::warn!(error = %e, "Database not reachable at startup"),
    }

    // --- App state ---
    let store = Arc::new(PgCaseLogStore::new(pool.clone()));
    let state = AppState {
        archiver: Arc::new(Archiver::new(store, config.archiver.clone())),
    };

    let app = build_app_router(state, &config.server);

    // --- Start server ---
    let host = config
        .server
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid HOST address '{}'", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped accepting connections, closing database pool");
    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init(),
    }
    .context("Failed to initialize tracing subscriber")
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
