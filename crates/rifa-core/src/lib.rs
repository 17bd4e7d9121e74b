//! # rifa-core: Pure Business Logic for the Rifa Storefront
//!
//! This crate holds the rules of the school fundraiser: what a raffle sale
//! looks like, how the local sale cache is reconciled with the realtime
//! remote feed, which numbers are still free, and how the cart and orders
//! are totalled. Everything here is deterministic and free of I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Rifa Architecture                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Storefront UI / Admin panel (external)             │   │
//! │  │     Number picker ──► Cart ──► Checkout ──► Dashboard           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │         rifa-sync (RaffleManager, Checkout, remote store)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ rifa-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌────────┐ ┌───────┐  │   │
//! │  │   │  types   │ │  ledger  │ │   cart   │ │ order  │ │ money │  │   │
//! │  │   │SaleRecord│ │  merge   │ │ expiry   │ │ flags  │ │ BRL   │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └────────┘ └───────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Sale records, statuses, products, customer info
//! - [`ledger`] - Snapshot merge, availability queries, dashboard summaries
//! - [`cart`] - Customer cart with raffle reservations that expire
//! - [`order`] - Checkout order snapshot and raffle submission flags
//! - [`money`] - Money type in integer centavos
//! - [`validation`] - Input rules (buyer name, phone, raffle numbers)
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use rifa_core::money::Money;
//!
//! let ticket = Money::from_cents(500);
//! assert_eq!((ticket * 3).to_string(), "R$ 15,00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod error;
pub mod ledger;
pub mod money;
pub mod order;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{Cart, CartItem, CartTotals, ProductLine, RaffleSelection};
pub use error::{CoreError, CoreResult, ValidationError};
pub use ledger::{merge_snapshot, MergeOutcome, SaleLedger, TurmaSummary};
pub use money::Money;
pub use order::{Order, OrderStatus, RaffleEntry, RafflesStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum product lines allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 50;

/// Maximum quantity of a single product in the cart.
pub const MAX_ITEM_QUANTITY: i64 = 99;

/// Maximum raffle numbers a single cart may hold.
///
/// Keeps a checkout to a bounded number of sequential remote writes.
pub const MAX_RAFFLE_NUMBERS_PER_CART: usize = 50;

/// How long a raffle number stays held in a cart before the sweep drops it.
pub const CART_RESERVATION_MINUTES: i64 = 30;

/// How long a cash reservation stays pending before an admin should act.
pub const CASH_RESERVATION_HOURS: i64 = 24;

/// Prefix for ids of sale records that have never reached the remote store.
pub const LOCAL_ID_PREFIX: &str = "local-";
