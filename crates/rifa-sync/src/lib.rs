//! # rifa-sync: Sale Reconciliation for the Rifa Storefront
//!
//! Keeps every storefront session's cache of raffle sales converged with
//! the shared sale store, and owns the only path that writes sales.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Rifa Sync Layer                                 │
//! │                                                                         │
//! │   Storefront session (kiosk / phone)           Sale hub                 │
//! │   ┌───────────────────────────────┐            ┌──────────────────────┐ │
//! │   │ CartService ─► CheckoutService│            │ HubServer (axum WS)  │ │
//! │   │                    │          │            │        │             │ │
//! │   │                    ▼          │            │        ▼             │ │
//! │   │              RaffleManager    │  WebSocket │  MemorySaleStore     │ │
//! │   │   cache ◄── merge ◄── watch ──┼────────────┼─ snapshots           │ │
//! │   │              │                │            │  unique active       │ │
//! │   │              └──► WsSaleStore─┼────────────┼─► insert / update    │ │
//! │   │                               │            │        │             │ │
//! │   │   SQLite: sale_cache, kv      │            │  SQLite: hub_sales   │ │
//! │   └───────────────────────────────┘            └──────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Session side
//! - [`manager`] - `RaffleManager`: cache, write path, resync, dashboards
//! - [`checkout`] - Cart service and PIX / cash checkout
//! - [`events`] - Typed event bus for the presentation layer
//! - [`transport`] - `WsSaleStore`: WebSocket client with reconnection
//!
//! ### Store side
//! - [`remote`] - `RemoteSaleStore` contract and the in-process store
//! - [`hub`] - WebSocket server exposing a `MemorySaleStore`
//! - [`protocol`] - Wire messages shared by client and hub
//!
//! ### Shared
//! - [`config`] - TOML + env configuration
//! - [`error`] - Sync and store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rifa_sync::{RaffleManager, RemoteSaleStore, RifaConfig, TransportConfig, WsSaleStore};
//!
//! let config = Arc::new(RifaConfig::load_or_default(None));
//! let remote = TransportConfig::from_config(&config)
//!     .map(|t| Arc::new(WsSaleStore::spawn(t)) as Arc<dyn RemoteSaleStore>);
//!
//! let manager = Arc::new(RaffleManager::new(config, database, remote));
//! let handle = manager.start().await?;
//!
//! let free = manager.get_available_numbers("3A").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod manager;
pub mod protocol;
pub mod remote;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use checkout::{
    CartService, CheckoutReport, CheckoutRequest, CheckoutService, ItemOutcome, ItemReport,
    SweeperHandle,
};
pub use config::{HubSettings, RifaConfig};
pub use error::{StoreError, StoreErrorKind, SyncError, SyncResult};
pub use events::{EventBus, RaffleEvent};
pub use hub::{HubHandle, HubServer};
pub use manager::{ManagerHandle, RaffleManager, ResyncReport, WriteOutcome};
pub use protocol::StoreMessage;
pub use remote::{MemorySaleStore, RemoteSaleStore, SaleSnapshot, StoreResult};
pub use transport::{TransportConfig, WsSaleStore};
