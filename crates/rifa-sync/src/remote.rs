//! # Remote Sale Store
//!
//! The contract every storefront session writes sales through, and the
//! in-process implementation the sale hub serves.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     RemoteSaleStore                                     │
//! │                                                                         │
//! │   subscribe()          ──► watch::Receiver<SaleSnapshot>               │
//! │                             full collection on every change,           │
//! │                             newest first; intermediate states may      │
//! │                             be coalesced                               │
//! │                                                                         │
//! │   insert(NewSale)      ──► SaleRecord (store assigns id + timestamps)  │
//! │   update_by_id(id, p)  ──► SaleRecord                                  │
//! │   remove_by_id(id)     ──► ()                                          │
//! │   query_all()          ──► Vec<SaleRecord>                             │
//! │                                                                         │
//! │   Failures are StoreError { kind: connection | permission |            │
//! │                                   precondition | not_found |           │
//! │                                   transient }                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//!   MemorySaleStore ── in-process; backs the hub and the tests
//!   WsSaleStore     ── WebSocket client to a hub (transport.rs)
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rifa_core::{ConnectionStatus, NewSale, SalePatch, SaleRecord};
use rifa_db::HubSalesRepository;

use crate::error::{StoreError, StoreErrorKind};

/// Result type for remote store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Snapshot
// =============================================================================

/// The whole collection at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleSnapshot {
    /// Increases with every change the store publishes. Zero means no
    /// snapshot has been received yet.
    pub version: u64,
    pub records: Vec<SaleRecord>,
}

// =============================================================================
// Trait
// =============================================================================

/// A realtime collection of sale records shared by every session.
#[async_trait]
pub trait RemoteSaleStore: Send + Sync {
    /// Live feed of full snapshots.
    fn subscribe(&self) -> watch::Receiver<SaleSnapshot>;

    /// Live feed of the link state.
    fn watch_connection(&self) -> watch::Receiver<ConnectionStatus>;

    async fn insert(&self, sale: NewSale) -> StoreResult<SaleRecord>;

    async fn update_by_id(&self, id: &str, patch: SalePatch) -> StoreResult<SaleRecord>;

    async fn remove_by_id(&self, id: &str) -> StoreResult<()>;

    async fn query_all(&self) -> StoreResult<Vec<SaleRecord>>;

    fn is_connected(&self) -> bool {
        self.watch_connection().borrow().is_online()
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process sale store.
///
/// Writes are serialized behind one lock, so the optional uniqueness check
/// on active `(turma, numero)` is a real compare-and-swap.
pub struct MemorySaleStore {
    records: Mutex<Vec<SaleRecord>>,
    snapshot_tx: watch::Sender<SaleSnapshot>,
    connection_tx: watch::Sender<ConnectionStatus>,
    enforce_unique_active: bool,
    repo: Option<HubSalesRepository>,
    insert_calls: AtomicUsize,
}

impl Default for MemorySaleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySaleStore {
    /// An empty, connected store that enforces uniqueness.
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(SaleSnapshot {
            version: 1,
            records: Vec::new(),
        });
        let (connection_tx, _) = watch::channel(ConnectionStatus::Online);

        MemorySaleStore {
            records: Mutex::new(Vec::new()),
            snapshot_tx,
            connection_tx,
            enforce_unique_active: true,
            repo: None,
            insert_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_unique_active(mut self, enforce: bool) -> Self {
        self.enforce_unique_active = enforce;
        self
    }

    /// Writes every change through to `repo`.
    pub fn with_persistence(mut self, repo: HubSalesRepository) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Seeds the collection, typically from `hub_sales` on hub startup.
    pub async fn seed(&self, records: Vec<SaleRecord>) {
        let mut guard = self.records.lock().await;
        *guard = records;
        self.publish(&mut guard);
        info!(count = guard.len(), "Sale store seeded");
    }

    /// Simulates losing or regaining the link. While disconnected every
    /// operation fails with a connection error and no snapshots are sent.
    pub fn set_connected(&self, connected: bool) {
        let status = if connected {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        self.connection_tx.send_replace(status);
        debug!(connected, "Sale store link toggled");
    }

    /// Number of `insert` calls received, including rejected ones.
    pub fn insert_count(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Current collection, newest first.
    pub async fn records(&self) -> Vec<SaleRecord> {
        self.records.lock().await.clone()
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connection_tx.borrow().is_online() {
            Ok(())
        } else {
            Err(StoreError::connection("sale store unreachable"))
        }
    }

    fn check_unique(&self, records: &[SaleRecord], candidate: &SaleRecord) -> StoreResult<()> {
        if !self.enforce_unique_active || !candidate.is_active() {
            return Ok(());
        }
        match records.iter().find(|r| {
            r.id != candidate.id && r.is_for(&candidate.turma, candidate.numero) && r.is_active()
        }) {
            Some(holder) => Err(StoreError::number_held(
                &candidate.turma,
                candidate.numero,
                holder.status,
            )),
            None => Ok(()),
        }
    }

    fn publish(&self, records: &mut Vec<SaleRecord>) {
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        let snapshot = records.clone();
        self.snapshot_tx.send_modify(|current| {
            current.version += 1;
            current.records = snapshot;
        });
    }

    async fn persist(&self, record: &SaleRecord) -> StoreResult<()> {
        if let Some(ref repo) = self.repo {
            repo.upsert(record)
                .await
                .map_err(|e| StoreError::new(StoreErrorKind::Transient, e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSaleStore for MemorySaleStore {
    fn subscribe(&self) -> watch::Receiver<SaleSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection_tx.subscribe()
    }

    async fn insert(&self, sale: NewSale) -> StoreResult<SaleRecord> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;

        let mut records = self.records.lock().await;

        // A resend of a write that already landed gets the stored record back.
        if let Some(alias) = sale.local_id.as_deref() {
            if let Some(existing) = records.iter().find(|r| r.local_id.as_deref() == Some(alias)) {
                debug!(id = %existing.id, local_id = %alias, "Insert already applied");
                return Ok(existing.clone());
            }
        }

        let record = sale.into_record(Uuid::new_v4().to_string(), Utc::now(), true);

        if let Err(e) = self.check_unique(&records, &record) {
            warn!(turma = %record.turma, numero = record.numero, "Insert refused: number held");
            return Err(e);
        }

        self.persist(&record).await?;
        records.push(record.clone());
        self.publish(&mut records);

        debug!(id = %record.id, turma = %record.turma, numero = record.numero, "Sale inserted");
        Ok(record)
    }

    async fn update_by_id(&self, id: &str, patch: SalePatch) -> StoreResult<SaleRecord> {
        self.ensure_connected()?;

        let mut records = self.records.lock().await;
        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::not_found(id))?;

        let mut updated = records[index].clone();
        patch.apply(&mut updated, Utc::now());
        self.check_unique(&records, &updated)?;

        self.persist(&updated).await?;
        records[index] = updated.clone();
        self.publish(&mut records);

        debug!(id = %id, status = %updated.status, "Sale updated");
        Ok(updated)
    }

    async fn remove_by_id(&self, id: &str) -> StoreResult<()> {
        self.ensure_connected()?;

        let mut records = self.records.lock().await;
        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::not_found(id))?;

        if let Some(ref repo) = self.repo {
            repo.delete(id)
                .await
                .map_err(|e| StoreError::new(StoreErrorKind::Transient, e.to_string()))?;
        }
        records.remove(index);
        self.publish(&mut records);

        debug!(id = %id, "Sale removed");
        Ok(())
    }

    async fn query_all(&self) -> StoreResult<Vec<SaleRecord>> {
        self.ensure_connected()?;
        Ok(self.records.lock().await.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
