//! # Order
//!
//! Snapshot of a cart at checkout, plus the bookkeeping that keeps raffle
//! numbers from being written twice.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PIX:   from_cart ──► AwaitingPixProof ──(proof)──► write numbers       │
//! │                         needs_confirmation           │                  │
//! │                                                      ▼                  │
//! │                                          all written? ──► Paid          │
//! │                                                                         │
//! │  Cash:  from_cart ──► PendingCash ──► write numbers immediately         │
//! │                                                                         │
//! │  raffles_status:  NotSubmitted ──► Submitted                            │
//! │                        │                                                │
//! │                        └──────────► PartiallyFailed ──(retry)──┘        │
//! │                                     only unwritten numbers resent       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::cart::{Cart, CartItem, CartTotals};
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{CustomerInfo, DeliveryPreference, PaymentMethod};

/// Payment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// PIX order waiting for the customer's proof of transfer.
    AwaitingPixProof,
    /// Cash order; numbers are reserved as `pendente`.
    PendingCash,
    /// PIX confirmed and every raffle number written.
    Paid,
}

/// Whether the order's raffle numbers reached the sale store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RafflesStatus {
    NotSubmitted,
    Submitted,
    PartiallyFailed,
}

/// One raffle number to be written for an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RaffleEntry {
    pub turma: String,
    pub numero: u32,
    pub unit_price_cents: i64,
}

/// A finalized checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    /// `PED-YYYYMMDD-XXXXXXXX`
    pub id: String,
    pub items: Vec<CartItem>,
    pub customer: CustomerInfo,
    pub payment_method: PaymentMethod,
    pub delivery: DeliveryPreference,
    pub totals: CartTotals,
    pub cash_tendered: Option<Money>,
    pub needs_confirmation: bool,
    pub status: OrderStatus,
    pub raffles_status: RafflesStatus,
    /// Numbers already handed to the sale store (synced or kept locally).
    pub written_numbers: Vec<RaffleEntry>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Snapshots the cart into a new order.
    ///
    /// ## Errors
    /// - `EmptyCart` if there is nothing to buy
    /// - `InsufficientCash` if a cash tender does not cover the total
    pub fn from_cart(
        cart: &Cart,
        customer: CustomerInfo,
        payment_method: PaymentMethod,
        delivery: DeliveryPreference,
        cash_tendered: Option<Money>,
        now: DateTime<Utc>,
    ) -> CoreResult<Order> {
        if cart.is_empty() {
            return Err(CoreError::EmptyCart);
        }

        let totals = cart.totals();
        let cash_tendered = match payment_method {
            PaymentMethod::Dinheiro => cash_tendered,
            PaymentMethod::Pix => None,
        };

        if let Some(tendered) = cash_tendered {
            if tendered < totals.total {
                return Err(CoreError::InsufficientCash {
                    tendered: tendered.to_string(),
                    total: totals.total.to_string(),
                });
            }
        }

        let (status, needs_confirmation) = match payment_method {
            PaymentMethod::Pix => (OrderStatus::AwaitingPixProof, true),
            PaymentMethod::Dinheiro => (OrderStatus::PendingCash, false),
        };

        Ok(Order {
            id: generate_order_id(now),
            items: cart.items.clone(),
            customer,
            payment_method,
            delivery,
            totals,
            cash_tendered,
            needs_confirmation,
            status,
            raffles_status: RafflesStatus::NotSubmitted,
            written_numbers: Vec::new(),
            created_at: now,
        })
    }

    pub fn total(&self) -> Money {
        self.totals.total
    }

    /// Troco for a cash order.
    pub fn change_due(&self) -> Option<Money> {
        self.cash_tendered
            .and_then(|tendered| self.totals.total.change_for(tendered))
    }

    /// Every raffle number in the order.
    pub fn raffle_entries(&self) -> Vec<RaffleEntry> {
        self.items
            .iter()
            .filter_map(|item| match item {
                CartItem::Raffle(selection) => Some(selection),
                CartItem::Product(_) => None,
            })
            .flat_map(|s| {
                s.numbers.iter().map(move |&numero| RaffleEntry {
                    turma: s.turma.clone(),
                    numero,
                    unit_price_cents: s.unit_price_cents,
                })
            })
            .collect()
    }

    /// Raffle numbers not yet handed to the sale store.
    pub fn pending_raffle_entries(&self) -> Vec<RaffleEntry> {
        self.raffle_entries()
            .into_iter()
            .filter(|e| !self.is_written(&e.turma, e.numero))
            .collect()
    }

    pub fn has_raffles(&self) -> bool {
        self.items.iter().any(|i| matches!(i, CartItem::Raffle(_)))
    }

    pub fn is_written(&self, turma: &str, numero: u32) -> bool {
        self.written_numbers
            .iter()
            .any(|e| e.turma == turma && e.numero == numero)
    }

    pub fn mark_raffle_written(&mut self, entry: RaffleEntry) {
        if !self.is_written(&entry.turma, entry.numero) {
            self.written_numbers.push(entry);
        }
    }

    /// Records the end of a submission attempt.
    ///
    /// A PIX order whose numbers are all written becomes `Paid`.
    pub fn finish_submission(&mut self) {
        if self.pending_raffle_entries().is_empty() {
            self.raffles_status = RafflesStatus::Submitted;
            if self.payment_method == PaymentMethod::Pix {
                self.status = OrderStatus::Paid;
                self.needs_confirmation = false;
            }
        } else {
            self.raffles_status = RafflesStatus::PartiallyFailed;
        }
    }

    pub fn is_fully_submitted(&self) -> bool {
        self.raffles_status == RafflesStatus::Submitted
    }
}

/// `PED-` + date + 8 random hex digits.
pub fn generate_order_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("PED-{}-{}", now.format("%Y%m%d"), suffix)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Product;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-10T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn customer() -> CustomerInfo {
        CustomerInfo {
            nome: "Maria".to_string(),
            telefone: "11987654321".to_string(),
            turma: Some("3A".to_string()),
            endereco: None,
        }
    }

    fn cart_with_raffles() -> Cart {
        let mut cart = Cart::new(now());
        cart.add_raffle_numbers("3A", &[42, 43], 500, now(), Duration::minutes(30))
            .unwrap();
        cart
    }

    #[test]
    fn test_order_id_format() {
        let id = generate_order_id(now());
        assert!(id.starts_with("PED-20260510-"));
        assert_eq!(id.len(), "PED-20260510-".len() + 8);
        assert_ne!(id, generate_order_id(now()));
    }

    #[test]
    fn test_empty_cart_is_refused() {
        let err = Order::from_cart(
            &Cart::new(now()),
            customer(),
            PaymentMethod::Pix,
            DeliveryPreference::Retirada,
            None,
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::EmptyCart));
    }

    #[test]
    fn test_pix_order_needs_confirmation() {
        let order = Order::from_cart(
            &cart_with_raffles(),
            customer(),
            PaymentMethod::Pix,
            DeliveryPreference::Retirada,
            Some(Money::from_cents(5000)),
            now(),
        )
        .unwrap();

        assert!(order.needs_confirmation);
        assert_eq!(order.status, OrderStatus::AwaitingPixProof);
        assert_eq!(order.cash_tendered, None);
        assert_eq!(order.raffle_entries().len(), 2);
    }

    #[test]
    fn test_cash_order_change_due() {
        let mut cart = cart_with_raffles();
        cart.add_product(
            &Product {
                id: "bolo".to_string(),
                name: "Bolo".to_string(),
                description: None,
                price_cents: 750,
                category: None,
                active: true,
            },
            1,
            now(),
        )
        .unwrap();

        let order = Order::from_cart(
            &cart,
            customer(),
            PaymentMethod::Dinheiro,
            DeliveryPreference::Entrega,
            Some(Money::from_cents(2000)),
            now(),
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::PendingCash);
        assert!(!order.needs_confirmation);
        assert_eq!(order.total(), Money::from_cents(1750));
        assert_eq!(order.change_due(), Some(Money::from_cents(250)));

        let short = Order::from_cart(
            &cart,
            customer(),
            PaymentMethod::Dinheiro,
            DeliveryPreference::Entrega,
            Some(Money::from_cents(1000)),
            now(),
        );
        assert!(matches!(short, Err(CoreError::InsufficientCash { .. })));
    }

    #[test]
    fn test_partial_submission_resends_only_unwritten() {
        let mut order = Order::from_cart(
            &cart_with_raffles(),
            customer(),
            PaymentMethod::Pix,
            DeliveryPreference::Retirada,
            None,
            now(),
        )
        .unwrap();

        let first = order.raffle_entries()[0].clone();
        order.mark_raffle_written(first.clone());
        order.mark_raffle_written(first);
        order.finish_submission();

        assert_eq!(order.raffles_status, RafflesStatus::PartiallyFailed);
        assert_eq!(order.status, OrderStatus::AwaitingPixProof);
        let pending = order.pending_raffle_entries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].numero, 43);

        order.mark_raffle_written(pending[0].clone());
        order.finish_submission();
        assert!(order.is_fully_submitted());
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.pending_raffle_entries().is_empty());
    }
}
