//! # Money Module
//!
//! Ticket prices, order totals and dashboard revenue are all integer
//! centavos. The dashboard adds up hundreds of R$ 5,00 tickets and has to
//! agree with the cash box to the centavo, which `f64` cannot promise:
//!
//! ```text
//!   500 centavos × 300 tickets = 150000 centavos = R$ 1.500,00
//! ```
//!
//! ## Usage
//! ```rust
//! use rifa_core::money::Money;
//!
//! let ticket = Money::from_cents(500);        // R$ 5,00
//! let three = ticket * 3;                     // R$ 15,00
//! let total = three + Money::from_cents(250); // R$ 17,50
//! assert_eq!(total.cents(), 1750);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in centavos (the smallest unit of the Brazilian real).
///
/// ## Design Decisions
/// - **i64 (signed)**: change due and adjustments may be negative
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - Serialized as a bare integer so the UI and the wire agree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from centavos.
    ///
    /// ## Example
    /// ```rust
    /// use rifa_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // R$ 10,99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from reais and centavos.
    ///
    /// ## Example
    /// ```rust
    /// use rifa_core::money::Money;
    ///
    /// assert_eq!(Money::from_reais_centavos(10, 99).cents(), 1099);
    /// assert_eq!(Money::from_reais_centavos(-5, 50).cents(), -550);
    /// ```
    ///
    /// ## Note
    /// For negative amounts, only the reais part should be negative.
    #[inline]
    pub const fn from_reais_centavos(reais: i64, centavos: i64) -> Self {
        if reais < 0 {
            Money(reais * 100 - centavos)
        } else {
            Money(reais * 100 + centavos)
        }
    }

    /// Returns the value in centavos.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole reais portion (truncated toward zero).
    #[inline]
    pub const fn reais(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the centavos portion (always 0-99).
    #[inline]
    pub const fn centavos_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use rifa_core::money::Money;
    ///
    /// let ticket = Money::from_cents(500);
    /// assert_eq!(ticket.multiply_quantity(4).cents(), 2000);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Change owed when the customer pays `tendered` in cash.
    ///
    /// Returns `None` when the tender does not cover this amount.
    ///
    /// ## User Workflow
    /// ```text
    /// Order total: R$ 17,50
    /// Customer: "vou pagar com R$ 20,00"
    ///      │
    ///      ▼
    /// change_for(R$ 20,00) ← THIS FUNCTION
    ///      │
    ///      ▼
    /// Troco: R$ 2,50 (shown on the order summary)
    /// ```
    pub fn change_for(&self, tendered: Money) -> Option<Money> {
        if tendered < *self {
            None
        } else {
            Some(tendered - *self)
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display in Brazilian format: `R$ 1.234,56`.
///
/// ## Note
/// The storefront formats with `Intl.NumberFormat`; this is used for logs
/// and the order summary text.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let digits = self.reais().abs().to_string();

        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }

        write!(f, "{}R$ {},{:02}", sign, grouped, self.centavos_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.reais(), 10);
        assert_eq!(money.centavos_part(), 99);
    }

    #[test]
    fn test_from_reais_centavos() {
        assert_eq!(Money::from_reais_centavos(10, 99).cents(), 1099);
        assert_eq!(Money::from_reais_centavos(-5, 50).cents(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "R$ 10,99");
        assert_eq!(Money::from_cents(500).to_string(), "R$ 5,00");
        assert_eq!(Money::from_cents(-550).to_string(), "-R$ 5,50");
        assert_eq!(Money::from_cents(0).to_string(), "R$ 0,00");
        assert_eq!(Money::from_cents(123456).to_string(), "R$ 1.234,56");
        assert_eq!(Money::from_cents(100000000).to_string(), "R$ 1.000.000,00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_change_for() {
        let total = Money::from_cents(1750);
        assert_eq!(total.change_for(Money::from_cents(2000)), Some(Money::from_cents(250)));
        assert_eq!(total.change_for(Money::from_cents(1750)), Some(Money::zero()));
        assert_eq!(total.change_for(Money::from_cents(1000)), None);
    }

    #[test]
    fn test_zero_and_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(100).is_positive());
        assert!(Money::from_cents(-100).is_negative());
        assert_eq!(Money::from_cents(-100).abs().cents(), 100);
    }
}
