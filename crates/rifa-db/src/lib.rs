//! # rifa-db: Database Layer for the Rifa Storefront
//!
//! Local persistence for a storefront session and for the sale hub, using
//! SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Rifa Data Flow                                   │
//! │                                                                         │
//! │  RaffleManager / Checkout / HubServer (rifa-sync)                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     rifa-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │◄───│ SaleCache          │  │ (embedded) │  │   │
//! │  │   │  SqlitePool   │    │ Session (kv)       │  │ 001_init   │  │   │
//! │  │   │               │    │ HubSales           │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (platform data dir, or :memory: in tests)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rifa_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("rifa.db")).await?;
//! let cached = db.sale_cache().load_all().await?;
//! let admin = db.session().is_admin().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::{keys, HubSalesRepository, SaleCacheRepository, SessionRepository};
