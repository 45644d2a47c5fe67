//! # Order Channel Sync
//!
//! HTTP service that connects external storefronts as channels, verifies
//! and ingests their order webhooks, and polls them on a schedule to pick
//! up whatever the webhooks missed.
//!
//! ## Architecture
//!
//! - Axum handles HTTP routing and request/response lifecycle
//! - SQLx (SQLite) holds channels, orders, sync configs, receipts and stats
//! - The sync coordinator owns polling timers, restored from the database at start-up

use anyhow::Context;
use tokio::signal;
use tracing::info;

use order_channel_sync::adapters::AdapterSet;
use order_channel_sync::config::Config;
use order_channel_sync::coordinator::SyncCoordinator;
use order_channel_sync::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_channel_sync=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("Starting order channel sync on {}", config.bind_addr);

    let pool = db::connect(&config.database_url).await?;

    let adapters = AdapterSet::with_timeout(config.platform_http_timeout)
        .context("failed to build platform HTTP client")?;
    let coordinator = SyncCoordinator::new(pool.clone(), adapters);
    let restored = coordinator.restore().await?;
    info!("{} polling timer(s) restored", restored);

    let bind_addr = config.bind_addr.clone();
    let app = create_app(AppState::new(pool, coordinator.clone(), config));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
    info!("Shutdown signal received");
}
