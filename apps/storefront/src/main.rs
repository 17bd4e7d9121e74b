//! # Rifa Storefront Daemon
//!
//! Headless storefront session: keeps the local sale cache converged with
//! the sale hub, pushes sales written while offline and releases expired
//! cart holds. The presentation layer drives the same `RaffleManager` and
//! `CheckoutService` through the library API.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Storefront Startup                                │
//! │                                                                         │
//! │  1. Initialize logging                                                  │
//! │  2. Load RifaConfig (file → env → validate)                             │
//! │  3. Open SQLite (migrations)                                            │
//! │  4. Spawn WsSaleStore if a remote is configured, else offline mode      │
//! │  5. RaffleManager::start (restore cache, subscribe, resync, refresh)    │
//! │  6. Restore cart, start cart sweeper                                    │
//! │  7. Log events until Ctrl+C / SIGTERM                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use rifa_db::{Database, DbConfig};
use rifa_storefront::{
    config_path, describe_event, ensure_parent_dir, init_tracing, shutdown_signal,
};
use rifa_sync::{
    CartService, RaffleManager, RemoteSaleStore, RifaConfig, TransportConfig, WsSaleStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting Rifa storefront...");

    let config = RifaConfig::load(config_path(std::env::args()))
        .context("failed to load configuration")?;
    info!(
        device_id = %config.device_id(),
        offline = config.is_offline(),
        turmas = config.turmas().len(),
        "Configuration loaded"
    );

    let db_path = config.database_path();
    ensure_parent_dir(&db_path)
        .with_context(|| format!("failed to create data directory for {}", db_path.display()))?;
    let db = Database::new(DbConfig::new(db_path.clone()))
        .await
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!(?db_path, "Database connected and migrations applied");

    let ws = TransportConfig::from_config(&config).map(|t| Arc::new(WsSaleStore::spawn(t)));
    let remote = ws.clone().map(|ws| ws as Arc<dyn RemoteSaleStore>);
    if remote.is_none() {
        warn!("No remote sale store configured, sales stay on this device");
    }

    let manager = Arc::new(RaffleManager::new(Arc::new(config), db.clone(), remote));

    // Subscribe before start so the restore event is logged too.
    let mut events = Box::pin(manager.events().stream());
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            info!(event = %describe_event(&event), "Raffle event");
            if let Ok(json) = serde_json::to_string(&event) {
                debug!(%json, "Raffle event payload");
            }
        }
    });

    let manager_handle = manager.start().await.context("failed to start raffle manager")?;

    let cart = Arc::new(CartService::new(manager.clone()));
    if let Err(e) = cart.restore().await {
        warn!(?e, "Could not restore saved cart");
    }
    let sweeper = cart.spawn_sweeper();

    info!(
        pending = manager.pending_count().await,
        status = ?manager.connection_status(),
        "Storefront ready"
    );

    shutdown_signal().await;

    sweeper.shutdown().await;
    manager_handle.shutdown().await;
    if let Some(ws) = ws {
        if let Err(e) = ws.shutdown().await {
            debug!(?e, "Transport already stopped");
        }
    }
    event_log.abort();
    db.close().await;

    info!("Storefront shutdown complete");
    Ok(())
}
