//! # Database Pool
//!
//! One SQLite file per process: a storefront session keeps its sale cache
//! and kv entries in it, the sale hub keeps its collection in it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig::new(path) / DbConfig::in_memory()                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new ── open (WAL, busy timeout) ── migrate                  │
//! │       │                                                                 │
//! │       ├──► sale_cache()  RaffleManager persists every merge            │
//! │       ├──► session()     admin flag, last sync, cart, last order       │
//! │       └──► hub_sales()   sale-hub write-through                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::{HubSalesRepository, SaleCacheRepository, SessionRepository};

// =============================================================================
// Configuration
// =============================================================================

/// Where the database lives and how many connections may touch it.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `None` keeps everything in memory for the lifetime of the pool.
    pub path: Option<PathBuf>,

    /// Default 4. A kiosk writes the whole cache on every merge, so a few
    /// readers next to one writer is plenty.
    pub pool_size: u32,

    /// How long a statement waits on a locked file before failing with
    /// `DbError::Busy`. Default 5 s.
    pub busy_timeout: Duration,

    /// Apply pending migrations on open. Default true.
    pub migrate: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: Some(path.into()),
            pool_size: 4,
            busy_timeout: Duration::from_secs(5),
            migrate: true,
        }
    }

    /// Private in-memory database, used by tests.
    pub fn in_memory() -> Self {
        DbConfig {
            path: None,
            pool_size: 1,
            busy_timeout: Duration::from_secs(5),
            migrate: true,
        }
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = SqliteConnectOptions::new().busy_timeout(self.busy_timeout);
        match &self.path {
            Some(path) => options
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            None => options.in_memory(true),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the pool. Clones share the same connections.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database and applies migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let location = config
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string());
        info!(%location, pool_size = config.pool_size, "Opening sale database");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.busy_timeout);

        // Every in-memory connection is its own database, so the single
        // connection must never be reaped.
        if config.path.is_none() {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options
            .connect_with(config.connect_options())
            .await
            .map_err(|e| DbError::Open(format!("{location}: {e}")))?;

        let db = Database { pool };
        if config.migrate {
            let applied = migrations::run_migrations(&db.pool).await?;
            debug!(applied, "Schema up to date");
        }

        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sale_cache(&self) -> SaleCacheRepository {
        SaleCacheRepository::new(self.pool.clone())
    }

    /// Kv entries for the admin session and checkout preferences.
    pub fn session(&self) -> SessionRepository {
        SessionRepository::new(self.pool.clone())
    }

    pub fn hub_sales(&self) -> HubSalesRepository {
        HubSalesRepository::new(self.pool.clone())
    }

    /// Waits for in-flight statements and closes every connection.
    pub async fn close(&self) {
        info!("Closing sale database");
        self.pool.close().await;
    }

    pub async fn is_reachable(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
