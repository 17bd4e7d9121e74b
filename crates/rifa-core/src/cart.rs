//! # Cart
//!
//! The customer's in-progress selection: catalog products and raffle
//! numbers held for a limited time.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cart Operations                                      │
//! │                                                                         │
//! │  Storefront Action        Cart Method               State Change        │
//! │  ─────────────────        ───────────               ────────────        │
//! │                                                                         │
//! │  Click Product ──────────► add_product() ─────────► line qty += n      │
//! │                                                                         │
//! │  Pick numbers ───────────► add_raffle_numbers() ──► selection pushed   │
//! │                             (reservation id,        (expires in 30m)   │
//! │                              expiry stamped)                           │
//! │                                                                         │
//! │  Timer (60 s) ───────────► sweep_expired() ───────► stale selections   │
//! │                                                      dropped            │
//! │                                                                         │
//! │  Checkout ok ────────────► clear() ───────────────► items.clear()      │
//! │                                                                         │
//! │  NOTE: Reservations are local only. Nothing is written remotely        │
//! │        until checkout.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All time-dependent methods take `now` so expiry can be tested without
//! a clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::Product;
use crate::validation::{validate_cart_size, validate_quantity};
use crate::{MAX_ITEM_QUANTITY, MAX_RAFFLE_NUMBERS_PER_CART};

// =============================================================================
// Cart Items
// =============================================================================

/// A catalog product line.
///
/// Name and price are frozen when the product is added, so the cart shows
/// consistent data even if the catalog changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductLine {
    pub product_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    #[ts(as = "String")]
    pub added_at: DateTime<Utc>,
}

impl ProductLine {
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

/// Raffle numbers of one turma picked together and held until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RaffleSelection {
    /// Temporary id; never sent to the remote store.
    pub reservation_id: String,
    pub turma: String,
    pub numbers: Vec<u32>,
    pub unit_price_cents: i64,
    #[ts(as = "String")]
    pub reserved_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
}

impl RaffleSelection {
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.numbers.len() as i64)
    }
}

/// An item in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartItem {
    Product(ProductLine),
    Raffle(RaffleSelection),
}

impl CartItem {
    pub fn line_total(&self) -> Money {
        match self {
            CartItem::Product(line) => line.line_total(),
            CartItem::Raffle(selection) => selection.line_total(),
        }
    }
}

// =============================================================================
// Cart
// =============================================================================

/// The shopping cart.
///
/// ## Invariants
/// - Product lines are unique by `product_id` (adding again bumps quantity)
/// - A `(turma, numero)` appears at most once across all selections
/// - At most `MAX_RAFFLE_NUMBERS_PER_CART` numbers in total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cart {
    pub items: Vec<CartItem>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Default for Cart {
    fn default() -> Self {
        Cart::new(Utc::now())
    }
}

impl Cart {
    pub fn new(now: DateTime<Utc>) -> Self {
        Cart {
            items: Vec::new(),
            created_at: now,
        }
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    /// Adds a product or increases its quantity if already present.
    pub fn add_product(&mut self, product: &Product, quantity: i64, now: DateTime<Utc>) -> CoreResult<()> {
        validate_quantity(quantity)?;

        if let Some(line) = self.product_line_mut(&product.id) {
            let requested = line.quantity + quantity;
            if requested > MAX_ITEM_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested,
                    max: MAX_ITEM_QUANTITY,
                });
            }
            line.quantity = requested;
            return Ok(());
        }

        validate_cart_size(self.product_lines().count()).map_err(|_| CoreError::CartTooLarge {
            max: crate::MAX_CART_ITEMS,
        })?;

        self.items.push(CartItem::Product(ProductLine {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price_cents: product.price_cents,
            quantity,
            added_at: now,
        }));
        Ok(())
    }

    /// Sets a product quantity. Zero removes the line.
    pub fn update_quantity(&mut self, product_id: &str, quantity: i64) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_product(product_id);
        }
        validate_quantity(quantity)?;

        match self.product_line_mut(product_id) {
            Some(line) => {
                line.quantity = quantity;
                Ok(())
            }
            None => Err(CoreError::ProductNotInCart(product_id.to_string())),
        }
    }

    pub fn remove_product(&mut self, product_id: &str) -> CoreResult<()> {
        let before = self.items.len();
        self.items
            .retain(|i| !matches!(i, CartItem::Product(line) if line.product_id == product_id));

        if self.items.len() == before {
            Err(CoreError::ProductNotInCart(product_id.to_string()))
        } else {
            Ok(())
        }
    }

    // -------------------------------------------------------------------------
    // Raffle numbers
    // -------------------------------------------------------------------------

    /// Holds raffle numbers in the cart until `now + ttl`.
    ///
    /// Fails without changing the cart if any number is already held here
    /// or repeated in `numbers`. Availability against other sessions is the
    /// caller's concern.
    ///
    /// ## Returns
    /// The temporary reservation id.
    pub fn add_raffle_numbers(
        &mut self,
        turma: &str,
        numbers: &[u32],
        unit_price_cents: i64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> CoreResult<String> {
        if numbers.is_empty() {
            return Err(ValidationError::Required {
                field: "numbers".to_string(),
            }
            .into());
        }

        for (i, &numero) in numbers.iter().enumerate() {
            if self.contains_number(turma, numero) || numbers[..i].contains(&numero) {
                return Err(CoreError::NumberAlreadyInCart {
                    turma: turma.to_string(),
                    numero,
                });
            }
        }

        if self.raffle_count() + numbers.len() > MAX_RAFFLE_NUMBERS_PER_CART {
            return Err(CoreError::TooManyRaffleNumbers {
                max: MAX_RAFFLE_NUMBERS_PER_CART,
            });
        }

        let reservation_id = format!("res-{}", Uuid::new_v4());
        let mut sorted = numbers.to_vec();
        sorted.sort_unstable();

        self.items.push(CartItem::Raffle(RaffleSelection {
            reservation_id: reservation_id.clone(),
            turma: turma.to_string(),
            numbers: sorted,
            unit_price_cents,
            reserved_at: now,
            expires_at: now + ttl,
        }));
        Ok(reservation_id)
    }

    /// Releases one number; drops its selection when it becomes empty.
    pub fn remove_raffle_number(&mut self, turma: &str, numero: u32) -> CoreResult<()> {
        let mut found = false;
        for item in &mut self.items {
            if let CartItem::Raffle(selection) = item {
                if selection.turma == turma {
                    let before = selection.numbers.len();
                    selection.numbers.retain(|&n| n != numero);
                    found |= selection.numbers.len() != before;
                }
            }
        }

        if !found {
            return Err(CoreError::NumberNotInCart {
                turma: turma.to_string(),
                numero,
            });
        }

        self.items
            .retain(|i| !matches!(i, CartItem::Raffle(s) if s.numbers.is_empty()));
        Ok(())
    }

    pub fn remove_reservation(&mut self, reservation_id: &str) -> CoreResult<RaffleSelection> {
        let index = self
            .items
            .iter()
            .position(|i| matches!(i, CartItem::Raffle(s) if s.reservation_id == reservation_id))
            .ok_or_else(|| CoreError::ReservationNotFound(reservation_id.to_string()))?;

        match self.items.remove(index) {
            CartItem::Raffle(selection) => Ok(selection),
            CartItem::Product(_) => Err(CoreError::ReservationNotFound(reservation_id.to_string())),
        }
    }

    /// Drops every selection whose hold has expired.
    ///
    /// ## Returns
    /// The dropped selections, so the caller can tell the customer.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<RaffleSelection> {
        let mut expired = Vec::new();
        let mut kept = Vec::with_capacity(self.items.len());

        for item in self.items.drain(..) {
            match item {
                CartItem::Raffle(selection) if selection.is_expired(now) => expired.push(selection),
                other => kept.push(other),
            }
        }

        self.items = kept;
        expired
    }

    pub fn contains_number(&self, turma: &str, numero: u32) -> bool {
        self.selections()
            .any(|s| s.turma == turma && s.numbers.contains(&numero))
    }

    /// Every held `(turma, numero)` pair, in cart order.
    pub fn raffle_numbers(&self) -> Vec<(String, u32)> {
        self.selections()
            .flat_map(|s| s.numbers.iter().map(move |&n| (s.turma.clone(), n)))
            .collect()
    }

    pub fn raffle_count(&self) -> usize {
        self.selections().map(|s| s.numbers.len()).sum()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn product_lines(&self) -> impl Iterator<Item = &ProductLine> {
        self.items.iter().filter_map(|i| match i {
            CartItem::Product(line) => Some(line),
            CartItem::Raffle(_) => None,
        })
    }

    pub fn selections(&self) -> impl Iterator<Item = &RaffleSelection> {
        self.items.iter().filter_map(|i| match i {
            CartItem::Raffle(selection) => Some(selection),
            CartItem::Product(_) => None,
        })
    }

    fn product_line_mut(&mut self, product_id: &str) -> Option<&mut ProductLine> {
        self.items.iter_mut().find_map(|i| match i {
            CartItem::Product(line) if line.product_id == product_id => Some(line),
            _ => None,
        })
    }

    /// Clears all items from the cart.
    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.items.clear();
        self.created_at = now;
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    pub fn totals(&self) -> CartTotals {
        CartTotals::from(self)
    }
}

// =============================================================================
// Totals
// =============================================================================

/// Cart totals summary for the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartTotals {
    pub product_lines: usize,
    pub product_quantity: i64,
    pub raffle_count: usize,
    pub products_subtotal: Money,
    pub raffle_subtotal: Money,
    pub total: Money,
}

impl From<&Cart> for CartTotals {
    fn from(cart: &Cart) -> Self {
        let products_subtotal: Money = cart.product_lines().map(ProductLine::line_total).sum();
        let raffle_subtotal: Money = cart.selections().map(RaffleSelection::line_total).sum();

        CartTotals {
            product_lines: cart.product_lines().count(),
            product_quantity: cart.product_lines().map(|l| l.quantity).sum(),
            raffle_count: cart.raffle_count(),
            products_subtotal,
            raffle_subtotal,
            total: products_subtotal + raffle_subtotal,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-10T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn product(id: &str, price_cents: i64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Produto {id}"),
            description: None,
            price_cents,
            category: None,
            active: true,
        }
    }

    #[test]
    fn test_add_same_product_increases_quantity() {
        let mut cart = Cart::new(t0());
        let brigadeiro = product("brigadeiro", 300);

        cart.add_product(&brigadeiro, 2, t0()).unwrap();
        cart.add_product(&brigadeiro, 3, t0()).unwrap();

        assert_eq!(cart.product_lines().count(), 1);
        assert_eq!(cart.totals().product_quantity, 5);
        assert_eq!(cart.total(), Money::from_cents(1500));
    }

    #[test]
    fn test_quantity_cap() {
        let mut cart = Cart::new(t0());
        let p = product("p", 100);

        cart.add_product(&p, MAX_ITEM_QUANTITY, t0()).unwrap();
        assert!(matches!(
            cart.add_product(&p, 1, t0()),
            Err(CoreError::QuantityTooLarge { .. })
        ));
        assert!(cart.update_quantity("p", 0).is_ok());
        assert!(cart.is_empty());
        assert!(cart.update_quantity("p", 2).is_err());
    }

    #[test]
    fn test_raffle_numbers_and_totals() {
        let mut cart = Cart::new(t0());
        cart.add_product(&product("bolo", 1200), 1, t0()).unwrap();
        cart.add_raffle_numbers("3A", &[42, 7], 500, t0(), Duration::minutes(30))
            .unwrap();

        let totals = cart.totals();
        assert_eq!(totals.raffle_count, 2);
        assert_eq!(totals.raffle_subtotal, Money::from_cents(1000));
        assert_eq!(totals.total, Money::from_cents(2200));
        assert_eq!(
            cart.raffle_numbers(),
            vec![("3A".to_string(), 7), ("3A".to_string(), 42)]
        );
    }

    #[test]
    fn test_duplicate_numbers_are_refused() {
        let mut cart = Cart::new(t0());
        cart.add_raffle_numbers("3A", &[42], 500, t0(), Duration::minutes(30))
            .unwrap();

        let err = cart
            .add_raffle_numbers("3A", &[1, 42], 500, t0(), Duration::minutes(30))
            .unwrap_err();
        assert!(matches!(err, CoreError::NumberAlreadyInCart { numero: 42, .. }));
        assert_eq!(cart.raffle_count(), 1);

        assert!(cart
            .add_raffle_numbers("3A", &[5, 5], 500, t0(), Duration::minutes(30))
            .is_err());

        // Same number, different turma, is a different ticket.
        assert!(cart
            .add_raffle_numbers("3B", &[42], 500, t0(), Duration::minutes(30))
            .is_ok());
    }

    #[test]
    fn test_reservation_expiry_sweep() {
        let mut cart = Cart::new(t0());
        cart.add_raffle_numbers("3A", &[10], 500, t0(), Duration::minutes(30))
            .unwrap();

        let swept = cart.sweep_expired(t0() + Duration::minutes(29));
        assert!(swept.is_empty());
        assert!(cart.contains_number("3A", 10));

        let swept = cart.sweep_expired(t0() + Duration::minutes(31));
        assert_eq!(swept.len(), 1);
        assert!(!cart.contains_number("3A", 10));
    }

    #[test]
    fn test_sweep_keeps_products() {
        let mut cart = Cart::new(t0());
        cart.add_product(&product("suco", 400), 1, t0()).unwrap();
        cart.add_raffle_numbers("3A", &[1], 500, t0(), Duration::minutes(30))
            .unwrap();

        cart.sweep_expired(t0() + Duration::hours(2));
        assert_eq!(cart.items.len(), 1);
        assert!(matches!(cart.items[0], CartItem::Product(_)));
    }

    #[test]
    fn test_remove_raffle_number_drops_empty_selection() {
        let mut cart = Cart::new(t0());
        let res = cart
            .add_raffle_numbers("3A", &[1, 2], 500, t0(), Duration::minutes(30))
            .unwrap();

        cart.remove_raffle_number("3A", 1).unwrap();
        assert_eq!(cart.raffle_count(), 1);
        cart.remove_raffle_number("3A", 2).unwrap();
        assert!(cart.is_empty());

        assert!(cart.remove_raffle_number("3A", 2).is_err());
        assert!(cart.remove_reservation(&res).is_err());
    }

    #[test]
    fn test_too_many_numbers() {
        let mut cart = Cart::new(t0());
        let numbers: Vec<u32> = (1..=MAX_RAFFLE_NUMBERS_PER_CART as u32 + 1).collect();
        assert!(matches!(
            cart.add_raffle_numbers("3A", &numbers, 500, t0(), Duration::minutes(30)),
            Err(CoreError::TooManyRaffleNumbers { .. })
        ));
    }

    #[test]
    fn test_cart_serializes_with_kind_tag() {
        let mut cart = Cart::new(t0());
        cart.add_raffle_numbers("3A", &[3], 500, t0(), Duration::minutes(30))
            .unwrap();

        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(json["items"][0]["kind"], "raffle");
        assert_eq!(json["items"][0]["turma"], "3A");
    }
}
