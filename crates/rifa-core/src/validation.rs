//! # Validation Module
//!
//! Input validation for buyer details, raffle numbers and cart operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Storefront form                                              │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Cart / RaffleManager (Rust)                                  │
//! │  └── THIS MODULE: business rule validation                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote store                                                 │
//! │  └── Active (turma, numero) uniqueness on insert                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use rifa_core::validation::{validate_buyer_name, validate_quantity};
//!
//! validate_buyer_name("Maria Souza").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use crate::error::ValidationError;
use crate::types::TurmaPool;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Buyer Validators
// =============================================================================

/// Validates a buyer name.
///
/// ## Rules
/// - Must not be empty
/// - At least 2 and at most 100 characters after trimming
///
/// ## Example
/// ```rust
/// use rifa_core::validation::validate_buyer_name;
///
/// assert!(validate_buyer_name("Ana").is_ok());
/// assert!(validate_buyer_name(" ").is_err());
/// ```
pub fn validate_buyer_name(nome: &str) -> ValidationResult<()> {
    let nome = nome.trim();

    if nome.is_empty() {
        return Err(ValidationError::Required {
            field: "nome".to_string(),
        });
    }

    let len = nome.chars().count();
    if len < 2 {
        return Err(ValidationError::TooShort {
            field: "nome".to_string(),
            min: 2,
        });
    }

    if len > 100 {
        return Err(ValidationError::TooLong {
            field: "nome".to_string(),
            max: 100,
        });
    }

    Ok(())
}

/// Validates a Brazilian phone number and returns its digits.
///
/// ## Rules
/// - Formatting characters (spaces, parentheses, hyphens, `+`) are ignored
/// - 10 or 11 digits (area code + number), or 12/13 with the `55` prefix
///
/// ## Example
/// ```rust
/// use rifa_core::validation::validate_phone;
///
/// assert_eq!(validate_phone("(11) 98765-4321").unwrap(), "11987654321");
/// assert!(validate_phone("12345").is_err());
/// ```
pub fn validate_phone(telefone: &str) -> ValidationResult<String> {
    let telefone = telefone.trim();

    if telefone.is_empty() {
        return Err(ValidationError::Required {
            field: "telefone".to_string(),
        });
    }

    if !telefone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '(' | ')' | '-' | '+' | '.'))
    {
        return Err(ValidationError::InvalidFormat {
            field: "telefone".to_string(),
            reason: "must contain only digits and separators".to_string(),
        });
    }

    let digits: String = telefone.chars().filter(|c| c.is_ascii_digit()).collect();
    let valid = match digits.len() {
        10 | 11 => true,
        12 | 13 => digits.starts_with("55"),
        _ => false,
    };

    if !valid {
        return Err(ValidationError::InvalidFormat {
            field: "telefone".to_string(),
            reason: "must have area code and 8 or 9 digit number".to_string(),
        });
    }

    Ok(digits)
}

// =============================================================================
// Raffle Validators
// =============================================================================

/// Validates that `turma` is one of the configured pools and returns it.
pub fn validate_turma<'a>(turma: &str, pools: &'a [TurmaPool]) -> ValidationResult<&'a TurmaPool> {
    let turma = turma.trim();

    if turma.is_empty() {
        return Err(ValidationError::Required {
            field: "turma".to_string(),
        });
    }

    pools
        .iter()
        .find(|p| p.code == turma)
        .ok_or_else(|| ValidationError::NotAllowed {
            field: "turma".to_string(),
            allowed: pools.iter().map(|p| p.code.clone()).collect(),
        })
}

/// Validates that a raffle number belongs to the pool.
///
/// ## Example
/// ```rust
/// use rifa_core::{validation::validate_numero, TurmaPool};
///
/// let pool = TurmaPool::new("3A", 1, 100);
/// assert!(validate_numero(&pool, 42).is_ok());
/// assert!(validate_numero(&pool, 0).is_err());
/// ```
pub fn validate_numero(pool: &TurmaPool, numero: u32) -> ValidationResult<()> {
    if !pool.contains(numero) {
        return Err(ValidationError::OutOfRange {
            field: format!("numero ({})", pool.code),
            min: pool.first as i64,
            max: pool.last as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a product quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in centavos. Zero is allowed.
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a cash tender amount.
pub fn validate_cash_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "cash amount".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates cart size before adding a new product line.
pub fn validate_cart_size(current_items: usize) -> ValidationResult<()> {
    if current_items >= MAX_CART_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "cart items".to_string(),
            min: 0,
            max: MAX_CART_ITEMS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
