//! Access Server - Main entry point
//!
//! Serves the multi-tenant access resolver over HTTP.

use anyhow::Context;
use std::net::SocketAddr;

use access_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    guard::AuditLogger,
    observability,
    store::Stores,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load().context("loading configuration from ACCESS__* environment")?;

    observability::init("access-server", &config.observability)?;
    if config.observability.metrics_enabled {
        observability::metrics::init_metrics()?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        global_admin_bypass = config.access.global_admin_bypass,
        superuser_roles = ?config.access.superuser_roles,
        "Starting Access Server"
    );
    if config.auth.jwt_secret.is_none() {
        tracing::warn!("No JWT secret configured; every bearer token will be rejected");
    }

    let db = Database::connect(&config.database).await?;
    db.migrate().await?;
    tracing::info!("Connected to database, migrations applied");

    let stores = Stores::postgres(db.manager(), config.access.superuser_roles.clone());
    let audit = AuditLogger::new(config.access.audit_channel_buffer);
    let app = api::build_router(AppState::new(stores, audit, config.access.clone()), &config.auth);

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid server host '{}'", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    observability::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
