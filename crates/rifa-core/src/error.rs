//! # Error Types
//!
//! Rule violations raised by the cart, orders and sale status changes, plus
//! input validation failures.
//!
//! ```text
//!   ValidationError ──► CoreError ──► SyncError (rifa-sync) ──► toast
//! ```
//!
//! Every message is shown to the person at the kiosk, so it names the turma
//! and number instead of internal ids wherever it can.

use thiserror::Error;

use crate::types::SaleStatus;

/// Cart, order and sale-status rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Product not in cart: {0}")]
    ProductNotInCart(String),

    /// The raffle number is already held by this cart.
    #[error("Number {numero} of {turma} is already in the cart")]
    NumberAlreadyInCart { turma: String, numero: u32 },

    /// The raffle number is not held by this cart.
    #[error("Number {numero} of {turma} is not in the cart")]
    NumberNotInCart { turma: String, numero: u32 },

    /// No reservation with this id is in the cart.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    #[error("Cart cannot hold more than {max} raffle numbers")]
    TooManyRaffleNumbers { max: usize },

    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Checkout was attempted with nothing in the cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Cash tender does not cover the order total.
    #[error("Cash amount {tendered} does not cover the total {total}")]
    InsufficientCash { tendered: String, total: String },

    /// Sale status cannot move from `from` to `to` without an admin override.
    ///
    /// ## When This Occurs
    /// - Marking a `pago` sale as `pendente`
    /// - Reactivating a `cancelado` sale
    #[error("Sale {sale_id} cannot change from {from} to {to}")]
    InvalidStatusTransition {
        sale_id: String,
        from: SaleStatus,
        to: SaleStatus,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Bad customer or raffle input. `field` is the user-facing field name
/// (`nome`, `telefone`, `turma`).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// e.g. a phone number with letters in it.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A turma that is not configured for this raffle.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

pub type CoreResult<T> = Result<T, CoreError>;
