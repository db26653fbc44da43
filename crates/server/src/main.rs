//! Supportdesk Server
//!
//! Realtime event hub for the support-conversation platform.

use std::net::SocketAddr;

use anyhow::Context;
use supportdesk_server::{config::ServerConfig, hub::Hub, router, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supportdesk_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Environment: {}", config.environment);

    let hub = Hub::start(config.hub.clone());
    let app = router(AppState::new(hub.clone(), config));

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then close every socket so open upgrades do not hold
/// the server open.
async fn shutdown_signal(hub: Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    hub.shutdown().await;
}
