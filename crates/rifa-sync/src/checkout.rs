//! # Cart & Checkout
//!
//! The customer-facing half of the storefront: a cart that holds raffle
//! numbers for a while, and the checkout that turns it into sale records.
//!
//! ## Checkout Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Checkout Flow                                   │
//! │                                                                         │
//! │  CartService                                                            │
//! │    add_raffle_numbers ──► refused if in cart or taken in the cache     │
//! │    sweeper (60 s) ──────► drops selections older than 30 min           │
//! │                                                                         │
//! │  CheckoutService::finalize_order                                        │
//! │    │                                                                    │
//! │    ├─ PIX ──► Order { needs_confirmation }   (nothing written yet)     │
//! │    │            │                                                       │
//! │    │            └─ confirm_pix_payment ──► confirm_payment_and_send    │
//! │    │                                        per number, 300 ms apart   │
//! │    │                                                                    │
//! │    └─ Cash ─► create_cash_reservation per number, 300 ms apart         │
//! │                                                                         │
//! │  Order.raffles_status:                                                  │
//! │    Submitted ───────► never resent                                      │
//! │    PartiallyFailed ─► retry_order resends only unwritten numbers       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cart holds are advisory. Two carts may hold the same number; the sale
//! store decides at write time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use rifa_core::validation::{
    validate_buyer_name, validate_cash_amount, validate_numero, validate_phone, validate_turma,
};
use rifa_core::{
    Cart, CartTotals, CustomerInfo, DeliveryPreference, Money, NewSale, Order, PaymentMethod,
    Product, RaffleEntry, RaffleSelection, SaleRecord,
};
use rifa_db::keys;

use crate::error::{SyncError, SyncResult};
use crate::manager::{RaffleManager, WriteOutcome};

// =============================================================================
// Cart Service
// =============================================================================

/// The session's cart, persisted to the kv store after every change.
pub struct CartService {
    manager: Arc<RaffleManager>,
    cart: Mutex<Cart>,
}

impl CartService {
    pub fn new(manager: Arc<RaffleManager>) -> Self {
        CartService {
            manager,
            cart: Mutex::new(Cart::new(Utc::now())),
        }
    }

    /// Restores the cart saved by the previous session, minus expired holds.
    pub async fn restore(&self) -> SyncResult<()> {
        let saved: Option<Cart> = self.manager.database().session().get_json(keys::CART).await?;
        let Some(mut saved) = saved else {
            return Ok(());
        };

        let dropped = saved.sweep_expired(Utc::now());
        info!(
            items = saved.items.len(),
            expired = dropped.len(),
            "Cart restored"
        );
        *self.cart.lock().await = saved;

        if !dropped.is_empty() {
            self.persist().await?;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> Cart {
        self.cart.lock().await.clone()
    }

    pub async fn totals(&self) -> CartTotals {
        self.cart.lock().await.totals()
    }

    pub async fn is_empty(&self) -> bool {
        self.cart.lock().await.is_empty()
    }

    async fn persist(&self) -> SyncResult<()> {
        let cart = self.cart.lock().await.clone();
        self.manager
            .database()
            .session()
            .set_json(keys::CART, &cart)
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Raffle Numbers
    // -------------------------------------------------------------------------

    /// Holds numbers of one turma at the current ticket price.
    ///
    /// ## Returns
    /// The temporary reservation id.
    ///
    /// ## Errors
    /// - `NumberTaken` if the cache shows an active sale for a number
    /// - `Core` for unknown turma, out-of-range number, or a number
    ///   already in the cart
    pub async fn add_raffle_numbers(&self, turma: &str, numbers: &[u32]) -> SyncResult<String> {
        self.add_raffle_numbers_at(turma, numbers, Utc::now()).await
    }

    /// [`add_raffle_numbers`](Self::add_raffle_numbers) with an explicit
    /// clock.
    pub async fn add_raffle_numbers_at(
        &self,
        turma: &str,
        numbers: &[u32],
        now: DateTime<Utc>,
    ) -> SyncResult<String> {
        let pool = validate_turma(turma, self.manager.turmas())?;
        for &numero in numbers {
            validate_numero(pool, numero)?;
        }

        for &numero in numbers {
            if let Some(holder) = self.manager.find_active(turma, numero).await {
                return Err(SyncError::NumberTaken {
                    turma: turma.to_string(),
                    numero,
                    status: holder.status,
                });
            }
        }

        let reservation_id = {
            let mut cart = self.cart.lock().await;
            cart.add_raffle_numbers(
                turma,
                numbers,
                self.manager.ticket_price_cents(),
                now,
                self.manager.config().timing.cart_ttl(),
            )?
        };

        debug!(turma, count = numbers.len(), %reservation_id, "Numbers held in cart");
        self.persist().await?;
        Ok(reservation_id)
    }

    pub async fn remove_raffle_number(&self, turma: &str, numero: u32) -> SyncResult<()> {
        self.cart.lock().await.remove_raffle_number(turma, numero)?;
        self.persist().await
    }

    pub async fn remove_reservation(&self, reservation_id: &str) -> SyncResult<RaffleSelection> {
        let removed = self.cart.lock().await.remove_reservation(reservation_id)?;
        self.persist().await?;
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    pub async fn add_product(&self, product: &Product, quantity: i64) -> SyncResult<()> {
        self.cart
            .lock()
            .await
            .add_product(product, quantity, Utc::now())?;
        self.persist().await
    }

    /// Quantity 0 removes the line.
    pub async fn update_quantity(&self, product_id: &str, quantity: i64) -> SyncResult<()> {
        self.cart.lock().await.update_quantity(product_id, quantity)?;
        self.persist().await
    }

    pub async fn remove_product(&self, product_id: &str) -> SyncResult<()> {
        self.cart.lock().await.remove_product(product_id)?;
        self.persist().await
    }

    pub async fn clear(&self) -> SyncResult<()> {
        self.cart.lock().await.clear(Utc::now());
        self.persist().await
    }

    // -------------------------------------------------------------------------
    // Expiry
    // -------------------------------------------------------------------------

    /// Drops selections whose hold has lapsed at `now`.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SyncResult<Vec<RaffleSelection>> {
        let dropped = self.cart.lock().await.sweep_expired(now);
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Expired cart holds released");
            self.persist().await?;
        }
        Ok(dropped)
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) on the configured interval.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let service = self.clone();
        let period = self.manager.config().timing.cart_sweep_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.sweep_expired(Utc::now()).await {
                            warn!(?e, "Cart sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Cart sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Stops the cart sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

// =============================================================================
// Checkout Types
// =============================================================================

/// What the customer typed on the checkout form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub customer: CustomerInfo,
    pub payment_method: PaymentMethod,
    pub delivery: DeliveryPreference,
    /// Cash handed over; ignored for PIX.
    pub cash_tendered: Option<Money>,
}

/// How one raffle number fared during a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Written { sale_id: String },
    StoredLocally { sale_id: String, reason: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub turma: String,
    pub numero: u32,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Result of a checkout step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReport {
    pub order: Order,
    /// Empty for a PIX order that is still waiting for its proof.
    pub items: Vec<ItemReport>,
}

impl CheckoutReport {
    /// No number was refused. Local-only writes count as success.
    pub fn is_success(&self) -> bool {
        !self
            .items
            .iter()
            .any(|i| matches!(i.outcome, ItemOutcome::Rejected { .. }))
    }

    pub fn rejected(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Rejected { .. }))
    }

    pub fn stored_locally_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::StoredLocally { .. }))
            .count()
    }
}

// =============================================================================
// Checkout Service
// =============================================================================

pub struct CheckoutService {
    manager: Arc<RaffleManager>,
    cart: Arc<CartService>,
    /// Orders of this session by id.
    orders: Mutex<HashMap<String, Order>>,
    /// Orders whose numbers are being written right now.
    in_flight: StdMutex<HashSet<String>>,
}

/// Exclusive right to write one order's numbers. Released on drop.
struct SubmissionClaim<'a> {
    in_flight: &'a StdMutex<HashSet<String>>,
    order_id: String,
}

impl Drop for SubmissionClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.order_id);
        }
    }
}

impl CheckoutService {
    pub fn new(manager: Arc<RaffleManager>, cart: Arc<CartService>) -> Self {
        CheckoutService {
            manager,
            cart,
            orders: Mutex::new(HashMap::new()),
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    /// Turns the cart into an order.
    ///
    /// PIX orders wait for [`confirm_pix_payment`](Self::confirm_pix_payment);
    /// cash orders reserve their numbers right away.
    ///
    /// ## Errors
    /// - `Core(Validation)` for a bad name, phone or cash amount
    /// - `Core(EmptyCart)` / `Core(InsufficientCash)`
    pub async fn finalize_order(&self, request: CheckoutRequest) -> SyncResult<CheckoutReport> {
        let mut customer = request.customer;
        validate_buyer_name(&customer.nome)?;
        customer.telefone = validate_phone(&customer.telefone)?;
        customer.nome = customer.nome.trim().to_string();

        if request.payment_method == PaymentMethod::Dinheiro {
            if let Some(tendered) = request.cash_tendered {
                validate_cash_amount(tendered.cents())?;
            }
        }

        let now = Utc::now();
        self.cart.sweep_expired(now).await?;
        let cart = self.cart.snapshot().await;

        let mut order = Order::from_cart(
            &cart,
            customer,
            request.payment_method,
            request.delivery,
            request.cash_tendered,
            now,
        )?;

        info!(
            order_id = %order.id,
            method = ?order.payment_method,
            total = %order.total(),
            raffles = order.raffle_entries().len(),
            "Order created"
        );

        self.save_preferences(&order).await;

        let items = match order.payment_method {
            PaymentMethod::Pix => Vec::new(),
            PaymentMethod::Dinheiro => self.submit(&mut order).await,
        };

        self.cart.clear().await?;
        self.remember(&order).await;

        Ok(CheckoutReport { order, items })
    }

    /// Writes the numbers of a PIX order whose proof was accepted.
    ///
    /// ## Errors
    /// - `SaleNotFound` if the order is unknown to this session
    /// - `NothingToSubmit` if the order was already fully submitted
    /// - `SubmissionInProgress` if an earlier confirmation is still writing
    ///
    /// An order with products only is marked paid without any write.
    pub async fn confirm_pix_payment(&self, order_id: &str) -> SyncResult<CheckoutReport> {
        let _claim = self.claim(order_id)?;
        let mut order = self.order_for_submission(order_id).await?;
        if order.payment_method != PaymentMethod::Pix {
            return Err(SyncError::NothingToSubmit(format!(
                "order {order_id} is not a PIX order"
            )));
        }

        let items = self.submit(&mut order).await;
        self.remember(&order).await;
        Ok(CheckoutReport { order, items })
    }

    /// Resends the unwritten numbers of a partially failed order.
    pub async fn retry_order(&self, order_id: &str) -> SyncResult<CheckoutReport> {
        let _claim = self.claim(order_id)?;
        let mut order = self.order_for_submission(order_id).await?;
        if !order.has_raffles() {
            return Err(SyncError::NothingToSubmit(format!(
                "order {order_id} has no raffle numbers"
            )));
        }

        let items = self.submit(&mut order).await;
        self.remember(&order).await;
        Ok(CheckoutReport { order, items })
    }

    fn claim(&self, order_id: &str) -> SyncResult<SubmissionClaim<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| SyncError::ChannelError("submission registry poisoned".into()))?;
        if !in_flight.insert(order_id.to_string()) {
            debug!(%order_id, "Submission already running");
            return Err(SyncError::SubmissionInProgress(order_id.to_string()));
        }
        Ok(SubmissionClaim {
            in_flight: &self.in_flight,
            order_id: order_id.to_string(),
        })
    }

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        if let Some(order) = self.orders.lock().await.get(order_id) {
            return Some(order.clone());
        }
        self.last_order()
            .await
            .filter(|order| order.id == order_id)
    }

    /// The most recent order, surviving restarts.
    pub async fn last_order(&self) -> Option<Order> {
        match self
            .manager
            .database()
            .session()
            .get_json::<Order>(keys::LAST_ORDER)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(?e, "Failed to read last order");
                None
            }
        }
    }

    /// Checkout form defaults from the previous visit.
    pub async fn saved_customer(&self) -> SyncResult<Option<CustomerInfo>> {
        Ok(self
            .manager
            .database()
            .session()
            .get_json(keys::CUSTOMER_INFO)
            .await?)
    }

    async fn order_for_submission(&self, order_id: &str) -> SyncResult<Order> {
        let order = self
            .order(order_id)
            .await
            .ok_or_else(|| SyncError::SaleNotFound(order_id.to_string()))?;

        if order.is_fully_submitted() {
            return Err(SyncError::NothingToSubmit(format!(
                "order {order_id} was already submitted"
            )));
        }
        Ok(order)
    }

    /// Writes every unwritten number of `order` sequentially and records
    /// the result on the order. No rollback on partial failure.
    async fn submit(&self, order: &mut Order) -> Vec<ItemReport> {
        let entries = order.pending_raffle_entries();
        let delay = self.manager.config().timing.checkout_item_delay();
        let mut reports = Vec::with_capacity(entries.len());

        for (i, entry) in entries.into_iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let sale = self.sale_for(order, &entry);
            let result = match order.payment_method {
                PaymentMethod::Pix => self.manager.confirm_payment_and_send(sale).await,
                PaymentMethod::Dinheiro => self.manager.create_cash_reservation(sale).await,
            };

            let outcome = match result {
                Ok(WriteOutcome::Synced(record)) => {
                    order.mark_raffle_written(entry.clone());
                    ItemOutcome::Written { sale_id: record.id }
                }
                Ok(WriteOutcome::StoredLocally { record, reason }) => {
                    order.mark_raffle_written(entry.clone());
                    ItemOutcome::StoredLocally {
                        sale_id: record.id,
                        reason,
                    }
                }
                Err(e) => match self.held_by_order(order, &entry, &e).await {
                    Some(holder) => {
                        debug!(order_id = %order.id, turma = %entry.turma, numero = entry.numero, "Number already written for this order");
                        order.mark_raffle_written(entry.clone());
                        ItemOutcome::Written { sale_id: holder.id }
                    }
                    None => {
                        warn!(order_id = %order.id, turma = %entry.turma, numero = entry.numero, ?e, "Raffle number not written");
                        ItemOutcome::Rejected {
                            reason: e.to_string(),
                        }
                    }
                },
            };

            reports.push(ItemReport {
                turma: entry.turma,
                numero: entry.numero,
                outcome,
            });
        }

        order.finish_submission();
        info!(
            order_id = %order.id,
            status = ?order.raffles_status,
            written = order.written_numbers.len(),
            "Order submission finished"
        );
        reports
    }

    /// The cached sale behind a `NumberTaken`, when it belongs to `order`.
    async fn held_by_order(
        &self,
        order: &Order,
        entry: &RaffleEntry,
        error: &SyncError,
    ) -> Option<SaleRecord> {
        if !matches!(error, SyncError::NumberTaken { .. }) {
            return None;
        }
        self.manager
            .find_active(&entry.turma, entry.numero)
            .await
            .filter(|holder| holder.order_id.as_deref() == Some(order.id.as_str()))
    }

    fn sale_for(&self, order: &Order, entry: &RaffleEntry) -> NewSale {
        let mut sale = NewSale::new(entry.turma.clone(), entry.numero, entry.unit_price_cents)
            .with_buyer(
                Some(order.customer.nome.clone()),
                Some(order.customer.telefone.clone()),
            );
        sale.order_id = Some(order.id.clone());
        sale
    }

    async fn remember(&self, order: &Order) {
        self.orders
            .lock()
            .await
            .insert(order.id.clone(), order.clone());

        if let Err(e) = self
            .manager
            .database()
            .session()
            .set_json(keys::LAST_ORDER, order)
            .await
        {
            warn!(?e, order_id = %order.id, "Failed to persist last order");
        }
    }

    async fn save_preferences(&self, order: &Order) {
        let session = self.manager.database().session();
        let results = [
            session.set_json(keys::CUSTOMER_INFO, &order.customer).await,
            session.set_json(keys::DELIVERY_PREFERENCE, &order.delivery).await,
            session
                .set_json(keys::PAYMENT_PREFERENCE, &order.payment_method)
                .await,
            match order.cash_tendered {
                Some(cash) => session.set_json(keys::CASH_AMOUNT, &cash.cents()).await,
                None => session.remove(keys::CASH_AMOUNT).await.map(|_| ()),
            },
        ];

        for result in results {
            if let Err(e) = result {
                debug!(?e, "Failed to persist checkout preference");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RifaConfig;
    use crate::remote::{MemorySaleStore, RemoteSaleStore};
    use rifa_core::{OrderStatus, RafflesStatus, SaleStatus};
    use rifa_db::{Database, DbConfig};

    async fn setup(store: Option<Arc<MemorySaleStore>>) -> (Arc<RaffleManager>, Arc<CartService>, CheckoutService) {
        setup_with_delay(store, 0).await
    }

    async fn setup_with_delay(
        store: Option<Arc<MemorySaleStore>>,
        item_delay_ms: u64,
    ) -> (Arc<RaffleManager>, Arc<CartService>, CheckoutService) {
        let mut config = RifaConfig::default();
        config.timing.checkout_item_delay_ms = item_delay_ms;
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = store.map(|s| s as Arc<dyn RemoteSaleStore>);
        let manager = Arc::new(RaffleManager::new(Arc::new(config), db, remote));
        let cart = Arc::new(CartService::new(manager.clone()));
        let checkout = CheckoutService::new(manager.clone(), cart.clone());
        (manager, cart, checkout)
    }

    fn request(method: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            customer: CustomerInfo {
                nome: "Ana Souza".into(),
                telefone: "(11) 98765-4321".into(),
                turma: Some("3A".into()),
                endereco: None,
            },
            payment_method: method,
            delivery: DeliveryPreference::Retirada,
            cash_tendered: None,
        }
    }

    #[tokio::test]
    async fn test_cart_refuses_taken_number() {
        let store = Arc::new(MemorySaleStore::new());
        let (manager, cart, _) = setup(Some(store)).await;

        manager
            .confirm_payment_and_send(NewSale::new("3A", 5, 500))
            .await
            .unwrap();

        let err = cart.add_raffle_numbers("3A", &[4, 5]).await.unwrap_err();
        assert!(matches!(err, SyncError::NumberTaken { numero: 5, .. }));
        assert!(cart.is_empty().await);

        cart.add_raffle_numbers("3A", &[4]).await.unwrap();
        assert!(cart.add_raffle_numbers("3A", &[4]).await.is_err());
        assert!(cart.add_raffle_numbers("3A", &[500]).await.is_err());
    }

    #[tokio::test]
    async fn test_cart_survives_restart() {
        let (manager, cart, _) = setup(None).await;
        cart.add_raffle_numbers("3B", &[1, 2]).await.unwrap();

        let restored = CartService::new(manager.clone());
        restored.restore().await.unwrap();
        assert_eq!(
            restored.snapshot().await.raffle_numbers(),
            vec![("3B".to_string(), 1), ("3B".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_pix_order_waits_for_confirmation() {
        let store = Arc::new(MemorySaleStore::new());
        let (manager, cart, checkout) = setup(Some(store.clone())).await;
        cart.add_raffle_numbers("3B", &[17, 18]).await.unwrap();

        let report = checkout.finalize_order(request(PaymentMethod::Pix)).await.unwrap();
        assert!(report.items.is_empty());
        assert!(report.order.needs_confirmation);
        assert_eq!(report.order.status, OrderStatus::AwaitingPixProof);
        assert_eq!(report.order.customer.telefone, "11987654321");
        assert_eq!(store.insert_count(), 0);
        assert!(cart.is_empty().await);

        let confirmed = checkout.confirm_pix_payment(&report.order.id).await.unwrap();
        assert!(confirmed.is_success());
        assert_eq!(confirmed.items.len(), 2);
        assert_eq!(confirmed.order.status, OrderStatus::Paid);
        assert!(manager.is_number_sold("3B", 17).await);
        assert!(manager.is_number_sold("3B", 18).await);

        let err = checkout.confirm_pix_payment(&report.order.id).await.unwrap_err();
        assert!(matches!(err, SyncError::NothingToSubmit(_)));
        assert_eq!(store.insert_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_pix_confirmations_write_once() {
        let store = Arc::new(MemorySaleStore::new());
        let (_manager, cart, checkout) = setup_with_delay(Some(store.clone()), 50).await;
        cart.add_raffle_numbers("3B", &[17, 18]).await.unwrap();
        let order_id = checkout
            .finalize_order(request(PaymentMethod::Pix))
            .await
            .unwrap()
            .order
            .id;

        let (first, second) = tokio::join!(
            checkout.confirm_pix_payment(&order_id),
            checkout.confirm_pix_payment(&order_id)
        );
        let (done, refused) = match (first, second) {
            (Ok(done), Err(refused)) | (Err(refused), Ok(done)) => (done, refused),
            other => panic!("expected one confirmation to win, got {other:?}"),
        };
        assert!(matches!(refused, SyncError::SubmissionInProgress(ref id) if *id == order_id));
        assert!(done.is_success());
        assert_eq!(done.order.status, OrderStatus::Paid);
        assert_eq!(store.insert_count(), 2);

        // The claim is released once the winner returns.
        let err = checkout.confirm_pix_payment(&order_id).await.unwrap_err();
        assert!(matches!(err, SyncError::NothingToSubmit(_)));
    }

    #[tokio::test]
    async fn test_number_already_written_for_same_order_counts_as_written() {
        let store = Arc::new(MemorySaleStore::new());
        let (manager, cart, checkout) = setup(Some(store.clone())).await;
        cart.add_raffle_numbers("3B", &[17, 18]).await.unwrap();
        let order_id = checkout
            .finalize_order(request(PaymentMethod::Pix))
            .await
            .unwrap()
            .order
            .id;

        // 17 landed during an earlier attempt that never reported back.
        let mut sale = NewSale::new("3B", 17, 500);
        sale.payment_method = PaymentMethod::Pix;
        sale.order_id = Some(order_id.clone());
        manager.confirm_payment_and_send(sale).await.unwrap();

        let report = checkout.confirm_pix_payment(&order_id).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.rejected().count(), 0);
        assert_eq!(report.order.status, OrderStatus::Paid);
        assert_eq!(report.order.raffles_status, RafflesStatus::Submitted);
        assert_eq!(store.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_number_held_by_other_order_is_rejected() {
        let store = Arc::new(MemorySaleStore::new());
        let (manager, cart, checkout) = setup(Some(store)).await;
        cart.add_raffle_numbers("3B", &[17]).await.unwrap();
        let order_id = checkout
            .finalize_order(request(PaymentMethod::Pix))
            .await
            .unwrap()
            .order
            .id;

        let mut sale = NewSale::new("3B", 17, 500);
        sale.order_id = Some("PED-20260101-00000000".into());
        manager.confirm_payment_and_send(sale).await.unwrap();

        let report = checkout.confirm_pix_payment(&order_id).await.unwrap();
        assert_eq!(report.rejected().count(), 1);
        assert_eq!(report.order.raffles_status, RafflesStatus::PartiallyFailed);
        assert_eq!(report.order.status, OrderStatus::AwaitingPixProof);
    }

    #[tokio::test]
    async fn test_products_only_pix_order_is_paid_on_confirmation() {
        let store = Arc::new(MemorySaleStore::new());
        let (_, cart, checkout) = setup(Some(store.clone())).await;
        let camiseta = Product {
            id: "camiseta".into(),
            name: "Camiseta da formatura".into(),
            description: None,
            price_cents: 4500,
            category: Some("vestuario".into()),
            active: true,
        };
        cart.add_product(&camiseta, 2).await.unwrap();

        let order_id = checkout
            .finalize_order(request(PaymentMethod::Pix))
            .await
            .unwrap()
            .order
            .id;

        let confirmed = checkout.confirm_pix_payment(&order_id).await.unwrap();
        assert!(confirmed.items.is_empty());
        assert_eq!(confirmed.order.status, OrderStatus::Paid);
        assert!(!confirmed.order.needs_confirmation);
        assert_eq!(store.insert_count(), 0);

        let err = checkout.confirm_pix_payment(&order_id).await.unwrap_err();
        assert!(matches!(err, SyncError::NothingToSubmit(_)));
        let err = checkout.retry_order(&order_id).await.unwrap_err();
        assert!(matches!(err, SyncError::NothingToSubmit(_)));
    }

    #[tokio::test]
    async fn test_cash_order_reserves_immediately() {
        let store = Arc::new(MemorySaleStore::new());
        let (manager, cart, checkout) = setup(Some(store)).await;
        cart.add_raffle_numbers("3A", &[42]).await.unwrap();

        let mut req = request(PaymentMethod::Dinheiro);
        req.cash_tendered = Some(Money::from_cents(1000));
        let report = checkout.finalize_order(req).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.order.status, OrderStatus::PendingCash);
        assert_eq!(report.order.raffles_status, RafflesStatus::Submitted);
        assert_eq!(report.order.change_due(), Some(Money::from_cents(500)));

        let sale = manager.sales_for_order(&report.order.id).await;
        assert_eq!(sale.len(), 1);
        assert_eq!(sale[0].status, SaleStatus::Pendente);
        assert_eq!(sale[0].payment_method, PaymentMethod::Dinheiro);
        assert!(sale[0].expires_at.is_some());
        assert_eq!(sale[0].nome.as_deref(), Some("Ana Souza"));

        let last = checkout.last_order().await.unwrap();
        assert_eq!(last.id, report.order.id);
        assert_eq!(
            checkout.saved_customer().await.unwrap().unwrap().nome,
            "Ana Souza"
        );
    }

    #[tokio::test]
    async fn test_partial_failure_retries_only_unwritten() {
        let store = Arc::new(MemorySaleStore::new());
        let (_manager, cart, checkout) = setup(Some(store.clone())).await;
        cart.add_raffle_numbers("3A", &[1, 2]).await.unwrap();

        // Another session takes number 2 after it entered this cart.
        store
            .insert(NewSale::new("3A", 2, 500))
            .await
            .unwrap();
        let before = store.insert_count();

        let report = checkout.finalize_order(request(PaymentMethod::Dinheiro)).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.rejected().count(), 1);
        assert_eq!(report.order.raffles_status, RafflesStatus::PartiallyFailed);
        assert!(report.order.is_written("3A", 1));

        // Number 2 is freed by an admin; only it is resent.
        let held = store.records().await.into_iter().find(|r| r.numero == 2).unwrap();
        store.remove_by_id(&held.id).await.unwrap();
        let inserts_before_retry = store.insert_count();

        let retry = checkout.retry_order(&report.order.id).await.unwrap();
        assert!(retry.is_success());
        assert_eq!(retry.items.len(), 1);
        assert_eq!(retry.items[0].numero, 2);
        assert_eq!(retry.order.raffles_status, RafflesStatus::Submitted);
        assert_eq!(store.insert_count(), inserts_before_retry + 1);
        assert!(inserts_before_retry > before);
    }

    #[tokio::test]
    async fn test_checkout_validates_customer() {
        let (_, cart, checkout) = setup(None).await;
        cart.add_raffle_numbers("3A", &[1]).await.unwrap();

        let mut req = request(PaymentMethod::Pix);
        req.customer.telefone = "123".into();
        assert!(checkout.finalize_order(req).await.is_err());

        let mut req = request(PaymentMethod::Pix);
        req.customer.nome = "".into();
        assert!(checkout.finalize_order(req).await.is_err());

        // Cart untouched by failed attempts
        assert!(!cart.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_cart_cannot_checkout() {
        let (_, _, checkout) = setup(None).await;
        assert!(checkout.finalize_order(request(PaymentMethod::Pix)).await.is_err());
    }
}
