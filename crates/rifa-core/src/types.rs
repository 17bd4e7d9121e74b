//! # Domain Types
//!
//! Core domain types used throughout the Rifa storefront.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SaleRecord    │   │    NewSale      │   │   SalePatch     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id / local_id  │   │  turma, numero  │   │  status?        │       │
//! │  │  turma, numero  │   │  buyer identity │   │  payment?       │       │
//! │  │  status         │   │  status, method │   └─────────────────┘       │
//! │  │  synced         │   │  (no id yet)    │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SaleStatus    │   │ PaymentMethod   │   │   SaleSource    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  pago           │   │  pix            │   │  online         │       │
//! │  │  pendente       │   │  dinheiro       │   │  manual         │       │
//! │  │  reservado      │   └─────────────────┘   │  local          │       │
//! │  │  cancelado      │                         └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! A sale record is born locally with `id = "local-<uuid>"`. Once the remote
//! store acknowledges it, `id` becomes the remote-assigned id and the old
//! local id is kept in `local_id` so callers holding it can still find it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::money::Money;
use crate::LOCAL_ID_PREFIX;

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a raffle sale.
///
/// ## State Machine
/// ```text
///   reservado ──┐
///               ├──► pago
///   pendente ───┤
///               └──► cancelado
///
///   pago / cancelado ──► anything   (admin force only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    /// Payment confirmed. The number is sold.
    Pago,
    /// Awaiting payment (cash reservation).
    Pendente,
    /// Held for a buyer, not yet paid.
    Reservado,
    /// Cancelled. The number can be sold again.
    Cancelado,
}

impl SaleStatus {
    /// All statuses, in dashboard order.
    pub const ALL: [SaleStatus; 4] = [
        SaleStatus::Pago,
        SaleStatus::Pendente,
        SaleStatus::Reservado,
        SaleStatus::Cancelado,
    ];

    /// Whether a sale in this status blocks its number.
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, SaleStatus::Cancelado)
    }

    /// Whether the number is held but not yet paid.
    #[inline]
    pub const fn is_held(&self) -> bool {
        matches!(self, SaleStatus::Pendente | SaleStatus::Reservado)
    }

    /// Whether leaving this status requires an admin override.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Pago | SaleStatus::Cancelado)
    }

    /// Checks whether a sale may move from `self` to `to`.
    ///
    /// Setting the same status again is always allowed. With `force`
    /// every transition is allowed.
    ///
    /// ## Example
    /// ```rust
    /// use rifa_core::SaleStatus;
    ///
    /// assert!(SaleStatus::Pendente.can_transition_to(SaleStatus::Pago, false));
    /// assert!(!SaleStatus::Pago.can_transition_to(SaleStatus::Pendente, false));
    /// assert!(SaleStatus::Pago.can_transition_to(SaleStatus::Pendente, true));
    /// ```
    pub fn can_transition_to(&self, to: SaleStatus, force: bool) -> bool {
        if force || *self == to {
            return true;
        }

        match self {
            SaleStatus::Pendente | SaleStatus::Reservado => {
                matches!(to, SaleStatus::Pago | SaleStatus::Cancelado)
            }
            SaleStatus::Pago | SaleStatus::Cancelado => false,
        }
    }

    /// Wire/storage name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pago => "pago",
            SaleStatus::Pendente => "pendente",
            SaleStatus::Reservado => "reservado",
            SaleStatus::Cancelado => "cancelado",
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pago" => Ok(SaleStatus::Pago),
            "pendente" => Ok(SaleStatus::Pendente),
            "reservado" => Ok(SaleStatus::Reservado),
            "cancelado" => Ok(SaleStatus::Cancelado),
            other => Err(format!("unknown sale status: {other}")),
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Instant transfer; confirmed by the customer sending proof.
    Pix,
    /// Cash handed to a volunteer.
    Dinheiro,
}

impl PaymentMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::Dinheiro => "dinheiro",
        }
    }
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Pix
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pix" => Ok(PaymentMethod::Pix),
            "dinheiro" => Ok(PaymentMethod::Dinheiro),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

// =============================================================================
// Sale Source
// =============================================================================

/// Where a sale was entered. Only used for the badge in the admin list.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SaleSource {
    Online,
    Manual,
    Local,
}

impl SaleSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SaleSource::Online => "online",
            SaleSource::Manual => "manual",
            SaleSource::Local => "local",
        }
    }
}

impl Default for SaleSource {
    fn default() -> Self {
        SaleSource::Online
    }
}

impl fmt::Display for SaleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaleSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(SaleSource::Online),
            "manual" => Ok(SaleSource::Manual),
            "local" => Ok(SaleSource::Local),
            other => Err(format!("unknown sale source: {other}")),
        }
    }
}

// =============================================================================
// Sale Record
// =============================================================================

/// One raffle number sold (or held) for one buyer.
///
/// ## Identity
/// - `id`: `local-<uuid>` until acknowledged, then the remote id
/// - `local_id`: the pre-sync id, kept after promotion
/// - `(turma, numero)`: business key, unique among active sales
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleRecord {
    pub id: String,
    pub local_id: Option<String>,
    pub turma: String,
    pub numero: u32,
    pub nome: Option<String>,
    pub telefone: Option<String>,
    pub status: SaleStatus,
    pub payment_method: PaymentMethod,
    pub source: SaleSource,
    pub order_id: Option<String>,
    /// Ticket price at the time of sale, in centavos.
    pub price_cents: i64,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    /// Cash reservations only: when an admin should chase the payment.
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    /// True once the remote store has acknowledged this record.
    pub synced: bool,
}

impl SaleRecord {
    /// Returns the ticket price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Whether this record blocks its number.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether this record has never reached the remote store.
    #[inline]
    pub fn is_local_only(&self) -> bool {
        !self.synced || self.id.starts_with(LOCAL_ID_PREFIX)
    }

    /// Whether `id` names this record, either by its current id or by
    /// the local alias it had before sync.
    pub fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.local_id.as_deref() == Some(id)
    }

    /// Whether this record is for the given pool and number.
    #[inline]
    pub fn is_for(&self, turma: &str, numero: u32) -> bool {
        self.numero == numero && self.turma == turma
    }

    /// Pending cash sale whose payment window has passed.
    pub fn is_expired_cash(&self, now: DateTime<Utc>) -> bool {
        self.status == SaleStatus::Pendente
            && self.payment_method == PaymentMethod::Dinheiro
            && self.expires_at.is_some_and(|at| at <= now)
    }

    /// Rebuilds the insert payload for a local-only record, carrying its
    /// local id so the acknowledged record keeps the alias.
    pub fn to_new_sale(&self) -> NewSale {
        NewSale {
            turma: self.turma.clone(),
            numero: self.numero,
            nome: self.nome.clone(),
            telefone: self.telefone.clone(),
            status: self.status,
            payment_method: self.payment_method,
            source: self.source,
            order_id: self.order_id.clone(),
            price_cents: self.price_cents,
            expires_at: self.expires_at,
            local_id: Some(self.id.clone()),
        }
    }
}

/// Generates a fresh local sale id.
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4())
}

// =============================================================================
// New Sale / Patch
// =============================================================================

/// Insert payload: a sale before anyone has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewSale {
    pub turma: String,
    pub numero: u32,
    pub nome: Option<String>,
    pub telefone: Option<String>,
    pub status: SaleStatus,
    pub payment_method: PaymentMethod,
    pub source: SaleSource,
    pub order_id: Option<String>,
    pub price_cents: i64,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when a local-only record is being pushed.
    pub local_id: Option<String>,
}

impl NewSale {
    /// A pending online sale of one number; callers override the fields
    /// that differ.
    pub fn new(turma: impl Into<String>, numero: u32, price_cents: i64) -> Self {
        Self {
            turma: turma.into(),
            numero,
            nome: None,
            telefone: None,
            status: SaleStatus::Pendente,
            payment_method: PaymentMethod::Pix,
            source: SaleSource::Online,
            order_id: None,
            price_cents,
            expires_at: None,
            local_id: None,
        }
    }

    /// Sets the buyer identity.
    pub fn with_buyer(mut self, nome: Option<String>, telefone: Option<String>) -> Self {
        self.nome = nome;
        self.telefone = telefone;
        self
    }

    /// Materializes this payload as a record with the given id.
    ///
    /// The remote store calls this with its own id and `synced = true`;
    /// the offline path calls it with a fresh local id and `synced = false`.
    pub fn into_record(self, id: String, now: DateTime<Utc>, synced: bool) -> SaleRecord {
        SaleRecord {
            id,
            local_id: self.local_id,
            turma: self.turma,
            numero: self.numero,
            nome: self.nome,
            telefone: self.telefone,
            status: self.status,
            payment_method: self.payment_method,
            source: self.source,
            order_id: self.order_id,
            price_cents: self.price_cents,
            timestamp: now,
            updated_at: now,
            expires_at: self.expires_at,
            synced,
        }
    }

    /// Builds the local-only record used when the remote is unreachable.
    pub fn into_local_record(mut self, now: DateTime<Utc>) -> SaleRecord {
        let id = self.local_id.take().unwrap_or_else(new_local_id);
        let mut record = self.into_record(id, now, false);
        record.local_id = None;
        record
    }
}

/// Partial update of a sale record. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalePatch {
    pub status: Option<SaleStatus>,
    pub payment_method: Option<PaymentMethod>,
}

impl SalePatch {
    pub fn status(status: SaleStatus) -> Self {
        Self {
            status: Some(status),
            payment_method: None,
        }
    }

    /// Applies the patch to a record, bumping `updated_at`.
    pub fn apply(&self, record: &mut SaleRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(method) = self.payment_method {
            record.payment_method = method;
        }
        record.updated_at = now;
    }
}

// =============================================================================
// Turma Pool
// =============================================================================

/// A class and the inclusive range of raffle numbers it sells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TurmaPool {
    pub code: String,
    pub first: u32,
    pub last: u32,
}

impl TurmaPool {
    pub fn new(code: impl Into<String>, first: u32, last: u32) -> Self {
        Self {
            code: code.into(),
            first,
            last,
        }
    }

    #[inline]
    pub fn contains(&self, numero: u32) -> bool {
        (self.first..=self.last).contains(&numero)
    }

    /// Count of numbers in the pool.
    pub fn size(&self) -> usize {
        if self.last < self.first {
            0
        } else {
            (self.last - self.first) as usize + 1
        }
    }

    pub fn numbers(&self) -> impl Iterator<Item = u32> {
        self.first..=self.last
    }
}

// =============================================================================
// Catalog / Customer
// =============================================================================

/// A catalog product (not a raffle number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub category: Option<String>,
    pub active: bool,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

/// Buyer details captured at checkout and remembered between visits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustomerInfo {
    pub nome: String,
    pub telefone: String,
    pub turma: Option<String>,
    pub endereco: Option<String>,
}

/// How the customer receives catalog products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPreference {
    /// Pick up at school.
    Retirada,
    /// Delivered to the address in `CustomerInfo`.
    Entrega,
}

impl Default for DeliveryPreference {
    fn default() -> Self {
        DeliveryPreference::Retirada
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// State of the link to the remote sale store, as shown in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Subscribed and receiving snapshots.
    Online,
    /// Trying to (re)establish the link.
    Connecting,
    /// No remote configured, or the link is down. Writes stay local.
    Offline,
}

impl ConnectionStatus {
    #[inline]
    pub const fn is_online(&self) -> bool {
        matches!(self, ConnectionStatus::Online)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, synced: bool) -> SaleRecord {
        NewSale::new("3A", 42, 500).into_record(id.to_string(), Utc::now(), synced)
    }

    #[test]
    fn test_status_transitions() {
        use SaleStatus::*;

        assert!(Pendente.can_transition_to(Pago, false));
        assert!(Reservado.can_transition_to(Pago, false));
        assert!(Pendente.can_transition_to(Cancelado, false));
        assert!(Reservado.can_transition_to(Cancelado, false));

        assert!(!Pago.can_transition_to(Pendente, false));
        assert!(!Pago.can_transition_to(Cancelado, false));
        assert!(!Cancelado.can_transition_to(Pago, false));
        assert!(!Pendente.can_transition_to(Reservado, false));

        assert!(Pago.can_transition_to(Pago, false));
        assert!(Cancelado.can_transition_to(Pendente, true));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&SaleStatus::Pago).unwrap(), "\"pago\"");
        assert_eq!(
            serde_json::from_str::<SaleStatus>("\"cancelado\"").unwrap(),
            SaleStatus::Cancelado
        );
        assert_eq!("reservado".parse::<SaleStatus>().unwrap(), SaleStatus::Reservado);
        assert!("vendido".parse::<SaleStatus>().is_err());
        assert_eq!(PaymentMethod::Dinheiro.to_string(), "dinheiro");
    }

    #[test]
    fn test_active_statuses() {
        assert!(SaleStatus::Pago.is_active());
        assert!(SaleStatus::Pendente.is_active());
        assert!(SaleStatus::Reservado.is_active());
        assert!(!SaleStatus::Cancelado.is_active());
    }

    #[test]
    fn test_matches_local_alias() {
        let mut record = sample("remote-1", true);
        record.local_id = Some("local-abc".to_string());

        assert!(record.matches_id("remote-1"));
        assert!(record.matches_id("local-abc"));
        assert!(!record.matches_id("other"));
    }

    #[test]
    fn test_local_record_round_trip_keeps_alias() {
        let local = NewSale::new("3B", 17, 500).into_local_record(Utc::now());
        assert!(local.id.starts_with(LOCAL_ID_PREFIX));
        assert!(local.is_local_only());
        assert_eq!(local.local_id, None);

        let payload = local.to_new_sale();
        assert_eq!(payload.local_id.as_deref(), Some(local.id.as_str()));

        let synced = payload.into_record("srv-9".to_string(), Utc::now(), true);
        assert!(synced.matches_id(&local.id));
        assert!(!synced.is_local_only());
    }

    #[test]
    fn test_expired_cash() {
        let now = Utc::now();
        let mut record = sample("r1", true);
        record.payment_method = PaymentMethod::Dinheiro;
        record.expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(record.is_expired_cash(now));

        record.status = SaleStatus::Pago;
        assert!(!record.is_expired_cash(now));
    }

    #[test]
    fn test_turma_pool() {
        let pool = TurmaPool::new("3A", 1, 100);
        assert_eq!(pool.size(), 100);
        assert!(pool.contains(1));
        assert!(pool.contains(100));
        assert!(!pool.contains(0));
        assert!(!pool.contains(101));
        assert_eq!(TurmaPool::new("X", 5, 4).size(), 0);
    }

    #[test]
    fn test_patch_apply() {
        let mut record = sample("r1", true);
        let later = record.updated_at + chrono::Duration::seconds(5);
        SalePatch::status(SaleStatus::Pago).apply(&mut record, later);
        assert_eq!(record.status, SaleStatus::Pago);
        assert_eq!(record.payment_method, PaymentMethod::Pix);
        assert_eq!(record.updated_at, later);
    }
}
