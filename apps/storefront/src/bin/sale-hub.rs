//! # Rifa Sale Hub
//!
//! The shared sale store every storefront session connects to. Serves the
//! WebSocket protocol from `rifa_sync::protocol` and keeps the collection in
//! the `hub_sales` table so a restart loses nothing.

use anyhow::Context;
use tracing::info;

use rifa_db::{Database, DbConfig};
use rifa_storefront::{config_path, ensure_parent_dir, init_tracing, shutdown_signal};
use rifa_sync::{HubServer, RifaConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting Rifa sale hub...");

    let config = RifaConfig::load(config_path(std::env::args()))
        .context("failed to load configuration")?;

    let db_path = config.database_path();
    ensure_parent_dir(&db_path)
        .with_context(|| format!("failed to create data directory for {}", db_path.display()))?;
    let db = Database::new(DbConfig::new(db_path.clone()))
        .await
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!(?db_path, "Database connected");

    let settings = config.hub.clone();
    info!(
        addr = %settings.bind_address(),
        project_id = %settings.project_id,
        unique_active = settings.enforce_unique_active,
        persist = settings.persist,
        "Hub configuration loaded"
    );

    let hub = HubServer::open(settings, db.hub_sales())
        .await
        .context("failed to load hub collection")?;
    let handle = hub.start().await.context("failed to start hub")?;
    info!(url = %handle.ws_url(), "Sale hub listening");

    shutdown_signal().await;

    handle.shutdown().await.context("failed to stop hub")?;
    db.close().await;

    info!("Sale hub shutdown complete");
    Ok(())
}
