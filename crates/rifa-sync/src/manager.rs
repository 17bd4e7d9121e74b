//! # Raffle Manager
//!
//! Owns this session's view of every raffle sale and the only path that
//! writes sales to the shared store.
//!
//! ## Manager Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RaffleManager                                    │
//! │                                                                         │
//! │   RemoteSaleStore ── watch<SaleSnapshot> ──┐                           │
//! │                                             ▼                           │
//! │                         ┌───────────────────────────────┐               │
//! │   send_sale() ─────────►│  RwLock<SaleLedger>           │──► sale_cache │
//! │   update_sale_status() ►│  merge = whole replacement    │   (SQLite)    │
//! │   resync / refresh ────►│  under the write lock         │               │
//! │                         └───────────────┬───────────────┘               │
//! │                                         │                               │
//! │                                         ▼                               │
//! │                                EventBus (RaffleEvent)                   │
//! │                                                                         │
//! │   BACKGROUND TASK (spawn_background)                                   │
//! │   • snapshot pushed      → merge                                       │
//! │   • link state changed   → ConnectionChanged, resync when back online  │
//! │   • every 60 s           → resync_pending (push synced = false)        │
//! │   • every 15 s           → refresh (query_all + merge)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Path
//! ```text
//!   send_sale(sale)
//!     │
//!     ├─ number held in the cache by an acknowledged sale ──► NumberTaken
//!     │
//!     ├─ no link ──────────────────────────► local record ──► StoredLocally
//!     │
//!     └─ insert ──┬─ ok ───────────────────► synced record ─► Synced
//!                 ├─ precondition ─────────────────────────► NumberTaken
//!                 └─ other failure ────────► local record ──► StoredLocally
//! ```
//!
//! No lock is held across a remote call. Between the cache recheck and the
//! insert another session can take the number; closing that window is up
//! to the store (see `HubSettings::enforce_unique_active`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use rifa_core::validation::{validate_numero, validate_turma};
use rifa_core::{
    new_local_id, ConnectionStatus, CoreError, NewSale, PaymentMethod, SaleLedger, SalePatch,
    SaleRecord, SaleSource, SaleStatus, TurmaPool, TurmaSummary,
};
use rifa_db::Database;

use crate::config::RifaConfig;
use crate::error::{StoreError, StoreErrorKind, SyncError, SyncResult};
use crate::events::{EventBus, RaffleEvent};
use crate::remote::{RemoteSaleStore, SaleSnapshot};

// =============================================================================
// Outcomes
// =============================================================================

/// Where a sale ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Acknowledged by the store.
    Synced(SaleRecord),
    /// Kept on this device only; the resync sweep will push it.
    StoredLocally { record: SaleRecord, reason: String },
}

impl WriteOutcome {
    pub fn record(&self) -> &SaleRecord {
        match self {
            WriteOutcome::Synced(record) => record,
            WriteOutcome::StoredLocally { record, .. } => record,
        }
    }

    pub fn into_record(self) -> SaleRecord {
        match self {
            WriteOutcome::Synced(record) => record,
            WriteOutcome::StoredLocally { record, .. } => record,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, WriteOutcome::Synced(_))
    }
}

/// Result of one resync sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Local records the store accepted.
    pub pushed: usize,
    /// Local records dropped because their number was taken.
    pub rejected: usize,
    /// Local records left for the next sweep.
    pub failed: usize,
}

// =============================================================================
// Manager
// =============================================================================

/// Session-wide sale cache and write path. Share it as `Arc<RaffleManager>`.
pub struct RaffleManager {
    config: Arc<RifaConfig>,
    db: Database,
    remote: Option<Arc<dyn RemoteSaleStore>>,
    ledger: RwLock<SaleLedger>,
    events: EventBus,
    admin: AtomicBool,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    /// Serializes cache writes so the newest state always lands last.
    persist_lock: Mutex<()>,
}

impl RaffleManager {
    /// Creates a manager. `remote = None` is permanent offline mode.
    pub fn new(
        config: Arc<RifaConfig>,
        db: Database,
        remote: Option<Arc<dyn RemoteSaleStore>>,
    ) -> Self {
        RaffleManager {
            config,
            db,
            remote,
            ledger: RwLock::new(SaleLedger::new()),
            events: EventBus::new(),
            admin: AtomicBool::new(false),
            last_sync: RwLock::new(None),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RifaConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn turmas(&self) -> &[TurmaPool] {
        self.config.turmas()
    }

    pub fn ticket_price_cents(&self) -> i64 {
        self.config.raffle.ticket_price_cents
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Restores the persisted cache and session flags.
    ///
    /// Returns the number of cached records.
    pub async fn load_cache(&self) -> SyncResult<usize> {
        let cached = self.db.sale_cache().load_all().await?;
        let session = self.db.session();

        let ledger = SaleLedger::from_records(cached);
        let total = ledger.len();
        let pending = ledger.unsynced_count();
        *self.ledger.write().await = ledger;

        self.admin.store(session.is_admin().await?, Ordering::SeqCst);
        *self.last_sync.write().await = session.last_sync().await?;

        info!(total, pending, "Sale cache restored");
        self.events.emit(RaffleEvent::DataRefreshed { total, pending });
        Ok(total)
    }

    /// Restores the cache, merges the current snapshot and starts the
    /// background task.
    pub async fn start(self: &Arc<Self>) -> SyncResult<ManagerHandle> {
        self.load_cache().await?;

        if let Some(remote) = &self.remote {
            let snapshot = remote.subscribe().borrow().clone();
            if snapshot.version > 0 {
                self.apply_snapshot(snapshot).await;
            }
        }

        Ok(self.spawn_background())
    }

    /// Spawns the subscription, resync and refresh loop.
    pub fn spawn_background(self: &Arc<Self>) -> ManagerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(self.clone().run(shutdown_rx));
        ManagerHandle { shutdown_tx, task }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let Some(remote) = self.remote.clone() else {
            info!("No sale store configured, running offline");
            let _ = shutdown_rx.recv().await;
            return;
        };

        let mut snapshots = remote.subscribe();
        let mut connection = remote.watch_connection();
        let mut snapshots_open = true;
        let mut connection_open = true;

        let mut resync = tokio::time::interval(self.config.timing.resync_interval());
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = tokio::time::interval(self.config.timing.refresh_interval());
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Raffle manager started");

        loop {
            tokio::select! {
                changed = snapshots.changed(), if snapshots_open => match changed {
                    Ok(()) => {
                        let snapshot = snapshots.borrow_and_update().clone();
                        if snapshot.version > 0 {
                            self.apply_snapshot(snapshot).await;
                        }
                    }
                    Err(_) => {
                        warn!("Snapshot feed closed");
                        snapshots_open = false;
                    }
                },

                changed = connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let status = *connection.borrow_and_update();
                        self.on_connection_changed(status).await;
                    }
                    Err(_) => connection_open = false,
                },

                _ = resync.tick() => {
                    if let Err(e) = self.resync_pending().await {
                        warn!(?e, "Resync sweep failed");
                    }
                }

                _ = refresh.tick() => {
                    if remote.is_connected() {
                        if let Err(e) = self.refresh().await {
                            debug!(?e, "Periodic refresh failed");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Raffle manager received shutdown");
                    break;
                }
            }
        }

        info!("Raffle manager stopped");
    }

    async fn on_connection_changed(&self, status: ConnectionStatus) {
        info!(?status, "Sale store link changed");
        self.events.emit(RaffleEvent::ConnectionChanged { status });

        if status.is_online() {
            match self.resync_pending().await {
                Ok(report) if report.pushed + report.rejected > 0 => {
                    info!(?report, "Pushed local sales after reconnect");
                }
                Ok(_) => {}
                Err(e) => warn!(?e, "Resync after reconnect failed"),
            }
        }
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Merges a pushed snapshot into the cache.
    pub async fn apply_snapshot(&self, snapshot: SaleSnapshot) {
        let (superseded, total) = {
            let mut ledger = self.ledger.write().await;
            let superseded = ledger.apply_snapshot(&snapshot.records);
            (superseded, ledger.len())
        };

        debug!(version = snapshot.version, total, "Snapshot merged");
        self.persist_cache().await;
        self.mark_synced_now().await;

        self.events.emit(RaffleEvent::RemoteSnapshotApplied {
            version: snapshot.version,
            total,
        });
        self.report_superseded(superseded);
    }

    fn report_superseded(&self, superseded: Vec<SaleRecord>) {
        for sale in superseded {
            warn!(
                id = %sale.id,
                turma = %sale.turma,
                numero = sale.numero,
                "Local sale lost its number to another sale"
            );
            self.events.emit(RaffleEvent::SaleRejected {
                sale,
                reason: "number taken by another sale".to_string(),
            });
        }
    }

    async fn persist_cache(&self) {
        let _guard = self.persist_lock.lock().await;
        let records = self.ledger.read().await.records().to_vec();

        if let Err(e) = self.db.sale_cache().replace_all(&records).await {
            warn!(?e, "Failed to persist sale cache");
        }
    }

    async fn mark_synced_now(&self) {
        let now = Utc::now();
        *self.last_sync.write().await = Some(now);
        if let Err(e) = self.db.session().set_last_sync(now).await {
            debug!(?e, "Failed to persist last sync time");
        }
    }

    // =========================================================================
    // Availability
    // =========================================================================

    pub async fn is_number_sold(&self, turma: &str, numero: u32) -> bool {
        self.ledger.read().await.is_number_sold(turma, numero)
    }

    pub async fn is_number_reserved(&self, turma: &str, numero: u32) -> bool {
        self.ledger.read().await.is_number_reserved(turma, numero)
    }

    /// The active sale, synced or not, holding the number.
    pub async fn find_active(&self, turma: &str, numero: u32) -> Option<SaleRecord> {
        self.ledger.read().await.active_sale(turma, numero).cloned()
    }

    /// Free numbers of a turma, ascending. Cancelled sales free their number.
    pub async fn get_available_numbers(&self, turma: &str) -> SyncResult<Vec<u32>> {
        let pool = validate_turma(turma, self.turmas())?;
        Ok(self.ledger.read().await.available_numbers(pool))
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Writes one sale to the store, falling back to a local record when
    /// the store cannot take it.
    ///
    /// ## Errors
    /// - `NumberTaken` if the cache or the store says the number is held
    /// - `Core` if `turma`/`numero` are not configured
    pub async fn send_sale(&self, mut sale: NewSale) -> SyncResult<WriteOutcome> {
        let pool = validate_turma(&sale.turma, self.turmas())?;
        validate_numero(pool, sale.numero)?;

        // The store keeps this alias on the acknowledged record, so a
        // local fallback for a write that did land is recognised later.
        if sale.local_id.is_none() {
            sale.local_id = Some(new_local_id());
        }

        let remote = match &self.remote {
            Some(remote) if remote.is_connected() => remote.clone(),
            Some(_) => {
                self.ensure_free_locally(&sale).await?;
                return self.store_locally(sale, "sale store offline".to_string()).await;
            }
            None => {
                self.ensure_free_locally(&sale).await?;
                return self
                    .store_locally(sale, "no sale store configured".to_string())
                    .await;
            }
        };

        // Best-effort recheck against acknowledged sales only.
        {
            let ledger = self.ledger.read().await;
            if let Some(holder) = ledger.active_synced_sale(&sale.turma, sale.numero) {
                debug!(turma = %sale.turma, numero = sale.numero, "Number already held in cache");
                return Err(SyncError::NumberTaken {
                    turma: sale.turma.clone(),
                    numero: sale.numero,
                    status: holder.status,
                });
            }
        }

        match remote.insert(sale.clone()).await {
            Ok(record) => {
                info!(
                    id = %record.id,
                    turma = %record.turma,
                    numero = record.numero,
                    status = %record.status,
                    "Sale synced"
                );
                let superseded = self.ledger.write().await.absorb(record.clone());
                self.persist_cache().await;
                self.events.emit(RaffleEvent::SaleAdded {
                    sale: record.clone(),
                });
                self.events.emit(RaffleEvent::NumberSold {
                    turma: record.turma.clone(),
                    numero: record.numero,
                    status: record.status,
                });
                self.report_superseded(superseded);
                Ok(WriteOutcome::Synced(record))
            }
            Err(e) if e.kind == StoreErrorKind::Precondition => {
                Err(number_taken(&sale.turma, sale.numero, &e))
            }
            Err(e) => {
                warn!(?e, turma = %sale.turma, numero = sale.numero, "Remote write failed, keeping sale locally");
                self.store_locally(sale, e.to_string()).await
            }
        }
    }

    /// Offline writes refuse a number already held on this device.
    async fn ensure_free_locally(&self, sale: &NewSale) -> SyncResult<()> {
        let ledger = self.ledger.read().await;
        match ledger.active_sale(&sale.turma, sale.numero) {
            Some(holder) => Err(SyncError::NumberTaken {
                turma: sale.turma.clone(),
                numero: sale.numero,
                status: holder.status,
            }),
            None => Ok(()),
        }
    }

    async fn store_locally(&self, sale: NewSale, reason: String) -> SyncResult<WriteOutcome> {
        let record = sale.into_local_record(Utc::now());
        info!(
            id = %record.id,
            turma = %record.turma,
            numero = record.numero,
            reason = %reason,
            "Sale stored locally"
        );

        let superseded = self.ledger.write().await.absorb(record.clone());
        self.persist_cache().await;
        self.events.emit(RaffleEvent::SaleAdded {
            sale: record.clone(),
        });
        self.report_superseded(superseded);

        Ok(WriteOutcome::StoredLocally { record, reason })
    }

    /// PIX sale whose proof was accepted: `pago` + `pix`.
    pub async fn confirm_payment_and_send(&self, mut sale: NewSale) -> SyncResult<WriteOutcome> {
        sale.status = SaleStatus::Pago;
        sale.payment_method = PaymentMethod::Pix;
        sale.expires_at = None;
        self.send_sale(sale).await
    }

    /// Cash sale held until paid: `pendente` + `dinheiro`, due within the
    /// configured cash window.
    pub async fn create_cash_reservation(&self, mut sale: NewSale) -> SyncResult<WriteOutcome> {
        sale.status = SaleStatus::Pendente;
        sale.payment_method = PaymentMethod::Dinheiro;
        sale.expires_at = Some(Utc::now() + self.config.timing.cash_ttl());
        self.send_sale(sale).await
    }

    /// Sale typed in by an administrator from the paper ledger.
    pub async fn record_manual_sale(&self, mut sale: NewSale) -> SyncResult<WriteOutcome> {
        sale.source = SaleSource::Manual;
        self.send_sale(sale).await
    }

    // =========================================================================
    // Admin Mutations
    // =========================================================================

    fn connected_remote(&self) -> SyncResult<Arc<dyn RemoteSaleStore>> {
        match &self.remote {
            Some(remote) if remote.is_connected() => Ok(remote.clone()),
            _ => Err(SyncError::Offline),
        }
    }

    async fn acknowledged_sale(&self, id: &str) -> SyncResult<SaleRecord> {
        let record = self
            .ledger
            .read()
            .await
            .find(id)
            .cloned()
            .ok_or_else(|| SyncError::SaleNotFound(id.to_string()))?;

        if record.is_local_only() {
            return Err(SyncError::LocalOnlyRecord { id: record.id });
        }
        Ok(record)
    }

    /// Changes the status of an acknowledged sale.
    ///
    /// `force` allows reverting a `pago` sale or reviving a cancelled one.
    /// The cache changes only after the store accepts.
    pub async fn update_sale_status(
        &self,
        id: &str,
        status: SaleStatus,
        force: bool,
    ) -> SyncResult<SaleRecord> {
        let remote = self.connected_remote()?;
        let current = self.acknowledged_sale(id).await?;

        if !current.status.can_transition_to(status, force) {
            return Err(CoreError::InvalidStatusTransition {
                sale_id: current.id,
                from: current.status,
                to: status,
            }
            .into());
        }

        let updated = remote
            .update_by_id(&current.id, SalePatch::status(status))
            .await
            .map_err(|e| match e.kind {
                StoreErrorKind::Precondition => number_taken(&current.turma, current.numero, &e),
                _ => SyncError::Store(e),
            })?;

        info!(
            id = %updated.id,
            turma = %updated.turma,
            numero = updated.numero,
            from = %current.status,
            to = %updated.status,
            "Sale status updated"
        );

        let superseded = self.ledger.write().await.absorb(updated.clone());
        self.persist_cache().await;

        self.events.emit(RaffleEvent::SaleStatusUpdated {
            id: updated.id.clone(),
            turma: updated.turma.clone(),
            numero: updated.numero,
            from: current.status,
            to: updated.status,
        });
        if updated.status == SaleStatus::Pago {
            self.events.emit(RaffleEvent::NumberSold {
                turma: updated.turma.clone(),
                numero: updated.numero,
                status: updated.status,
            });
        }
        self.report_superseded(superseded);

        Ok(updated)
    }

    /// Hard-deletes an acknowledged sale.
    pub async fn remove_sale(&self, id: &str) -> SyncResult<()> {
        let remote = self.connected_remote()?;
        let current = self.acknowledged_sale(id).await?;

        remote.remove_by_id(&current.id).await?;
        self.ledger.write().await.remove(&current.id);
        self.persist_cache().await;

        info!(id = %current.id, turma = %current.turma, numero = current.numero, "Sale removed");
        self.events.emit(RaffleEvent::SaleRemoved {
            id: current.id,
            turma: current.turma,
            numero: current.numero,
        });
        Ok(())
    }

    // =========================================================================
    // Resync / Refresh
    // =========================================================================

    /// Pushes every local-only record to the store.
    ///
    /// Records whose number the store refuses are dropped and reported
    /// with `SaleRejected`. Others stay for the next sweep. Does nothing
    /// while offline.
    pub async fn resync_pending(&self) -> SyncResult<ResyncReport> {
        let mut report = ResyncReport::default();
        let remote = match &self.remote {
            Some(remote) if remote.is_connected() => remote.clone(),
            _ => return Ok(report),
        };

        let pending = self.ledger.read().await.unsynced();
        if pending.is_empty() {
            return Ok(report);
        }
        debug!(count = pending.len(), "Resyncing local sales");

        let mut superseded = Vec::new();
        for local in pending {
            match remote.insert(local.to_new_sale()).await {
                Ok(record) => {
                    info!(local_id = %local.id, id = %record.id, "Local sale pushed");
                    superseded.extend(self.ledger.write().await.absorb(record.clone()));
                    self.events.emit(RaffleEvent::NumberSold {
                        turma: record.turma,
                        numero: record.numero,
                        status: record.status,
                    });
                    report.pushed += 1;
                }
                Err(e) if e.kind == StoreErrorKind::Precondition => {
                    if let Some(landed) = find_landed(remote.as_ref(), &local.id).await {
                        info!(local_id = %local.id, id = %landed.id, "Local sale had already reached the store");
                        superseded.extend(self.ledger.write().await.absorb(landed.clone()));
                        self.events.emit(RaffleEvent::NumberSold {
                            turma: landed.turma,
                            numero: landed.numero,
                            status: landed.status,
                        });
                        report.pushed += 1;
                        continue;
                    }
                    warn!(id = %local.id, turma = %local.turma, numero = local.numero, "Local sale refused by store");
                    self.ledger.write().await.remove(&local.id);
                    self.events.emit(RaffleEvent::SaleRejected {
                        sale: local,
                        reason: e.message,
                    });
                    report.rejected += 1;
                }
                Err(e) => {
                    debug!(?e, id = %local.id, "Local sale still pending");
                    report.failed += 1;
                    if e.kind == StoreErrorKind::Connection {
                        break;
                    }
                }
            }
        }

        self.persist_cache().await;
        if report.pushed > 0 {
            self.mark_synced_now().await;
        }
        self.report_superseded(superseded);
        Ok(report)
    }

    /// Reloads the whole collection and merges it. Also used when the
    /// storefront regains visibility.
    pub async fn refresh(&self) -> SyncResult<usize> {
        let remote = self.connected_remote()?;
        let records = remote.query_all().await?;

        let (superseded, total, pending) = {
            let mut ledger = self.ledger.write().await;
            let superseded = ledger.apply_snapshot(&records);
            (superseded, ledger.len(), ledger.unsynced_count())
        };

        self.persist_cache().await;
        self.mark_synced_now().await;
        self.events.emit(RaffleEvent::DataRefreshed { total, pending });
        self.report_superseded(superseded);
        Ok(total)
    }

    // =========================================================================
    // Admin Session
    // =========================================================================

    /// Compares `password` with the configured secret and persists the
    /// admin flag. An empty secret disables admin login.
    pub async fn login(&self, password: &str) -> SyncResult<()> {
        let secret = &self.config.admin.password;
        if secret.is_empty() || password != secret {
            warn!("Admin login refused");
            return Err(SyncError::InvalidPassword);
        }

        self.db.session().set_admin(true).await?;
        self.admin.store(true, Ordering::SeqCst);
        info!("Admin logged in");
        Ok(())
    }

    pub async fn logout(&self) -> SyncResult<()> {
        self.db.session().set_admin(false).await?;
        self.admin.store(false, Ordering::SeqCst);
        info!("Admin logged out");
        Ok(())
    }

    pub fn is_admin(&self) -> bool {
        self.admin.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Dashboard Queries
    // =========================================================================

    /// Every cached sale, newest first.
    pub async fn sales(&self) -> Vec<SaleRecord> {
        self.ledger.read().await.records().to_vec()
    }

    pub async fn find_sale(&self, id: &str) -> Option<SaleRecord> {
        self.ledger.read().await.find(id).cloned()
    }

    pub async fn sales_for_order(&self, order_id: &str) -> Vec<SaleRecord> {
        self.ledger.read().await.by_order(order_id)
    }

    /// Per-turma counts and revenue, in configuration order.
    pub async fn summary(&self) -> Vec<TurmaSummary> {
        let ledger = self.ledger.read().await;
        self.turmas().iter().map(|pool| ledger.summary(pool)).collect()
    }

    pub async fn recent_sales(&self, window: Duration) -> Vec<SaleRecord> {
        self.ledger.read().await.recent(Utc::now(), window)
    }

    /// Local-only sales waiting for the store.
    pub async fn pending_count(&self) -> usize {
        self.ledger.read().await.unsynced_count()
    }

    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read().await
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        match &self.remote {
            Some(remote) => {
                let rx = remote.watch_connection();
                let status = *rx.borrow();
                status
            }
            None => ConnectionStatus::Offline,
        }
    }

    /// Pending cash sales past their payment window.
    pub async fn expired_cash_reservations(&self, now: DateTime<Utc>) -> Vec<SaleRecord> {
        self.ledger.read().await.expired_cash(now)
    }
}

/// The stored copy of a local sale whose acknowledgement never arrived.
async fn find_landed(remote: &dyn RemoteSaleStore, local_id: &str) -> Option<SaleRecord> {
    match remote.query_all().await {
        Ok(records) => records
            .into_iter()
            .find(|r| r.local_id.as_deref() == Some(local_id)),
        Err(e) => {
            debug!(?e, %local_id, "Could not look up local sale in the store");
            None
        }
    }
}

fn number_taken(turma: &str, numero: u32, error: &StoreError) -> SyncError {
    SyncError::NumberTaken {
        turma: turma.to_string(),
        numero,
        status: error.held_status.unwrap_or(SaleStatus::Pendente),
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Controls the background task started by [`RaffleManager::start`].
pub struct ManagerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    /// Stops the background task and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(?e, "Raffle manager task ended abnormally");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemorySaleStore;
    use rifa_db::DbConfig;

    async fn manager(remote: Option<Arc<MemorySaleStore>>) -> RaffleManager {
        let mut config = RifaConfig::default();
        config.admin.password = "segredo".to_string();
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = remote.map(|r| r as Arc<dyn RemoteSaleStore>);
        RaffleManager::new(Arc::new(config), db, remote)
    }

    #[tokio::test]
    async fn test_offline_mode_stores_locally() {
        let manager = manager(None).await;
        assert_eq!(manager.connection_status(), ConnectionStatus::Offline);

        let outcome = manager
            .confirm_payment_and_send(NewSale::new("3A", 7, 500))
            .await
            .unwrap();

        assert!(!outcome.is_synced());
        let record = outcome.record();
        assert!(record.id.starts_with("local-"));
        assert!(!record.synced);
        assert!(manager.is_number_sold("3A", 7).await);
        assert_eq!(manager.pending_count().await, 1);

        // Persisted for the next session
        let cached = manager.database().sale_cache().load_unsynced().await.unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_refuses_number_held_locally() {
        let manager = manager(None).await;
        manager
            .create_cash_reservation(NewSale::new("3A", 7, 500))
            .await
            .unwrap();

        let err = manager
            .confirm_payment_and_send(NewSale::new("3A", 7, 500))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NumberTaken { status: SaleStatus::Pendente, .. }));
    }

    #[tokio::test]
    async fn test_unknown_turma_and_number_rejected() {
        let manager = manager(None).await;
        assert!(manager.send_sale(NewSale::new("9Z", 1, 500)).await.is_err());
        assert!(manager.send_sale(NewSale::new("3A", 9999, 500)).await.is_err());
        assert!(manager.get_available_numbers("9Z").await.is_err());
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_synced_write_emits_events() {
        let store = Arc::new(MemorySaleStore::new());
        let manager = manager(Some(store.clone())).await;
        let mut events = manager.events().subscribe();

        let outcome = manager
            .confirm_payment_and_send(NewSale::new("3B", 17, 500))
            .await
            .unwrap();
        assert!(outcome.is_synced());
        assert!(outcome.record().local_id.as_deref().unwrap().starts_with("local-"));

        assert!(matches!(events.recv().await.unwrap(), RaffleEvent::SaleAdded { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            RaffleEvent::NumberSold {
                turma: "3B".into(),
                numero: 17,
                status: SaleStatus::Pago
            }
        );
    }

    #[tokio::test]
    async fn test_status_update_requires_acknowledged_sale() {
        let store = Arc::new(MemorySaleStore::new());
        let manager = manager(Some(store.clone())).await;

        store.set_connected(false);
        let local = manager
            .create_cash_reservation(NewSale::new("3A", 1, 500))
            .await
            .unwrap()
            .into_record();
        store.set_connected(true);

        let err = manager
            .update_sale_status(&local.id, SaleStatus::Pago, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::LocalOnlyRecord { .. }));

        let err = manager
            .update_sale_status("missing", SaleStatus::Pago, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SaleNotFound(_)));
    }

    #[tokio::test]
    async fn test_status_transitions_enforced() {
        let store = Arc::new(MemorySaleStore::new());
        let manager = manager(Some(store.clone())).await;

        let sale = manager
            .confirm_payment_and_send(NewSale::new("3A", 3, 500))
            .await
            .unwrap()
            .into_record();

        let err = manager
            .update_sale_status(&sale.id, SaleStatus::Pendente, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::InvalidStatusTransition { .. })));
        assert!(manager.is_number_sold("3A", 3).await);

        let reverted = manager
            .update_sale_status(&sale.id, SaleStatus::Pendente, true)
            .await
            .unwrap();
        assert_eq!(reverted.status, SaleStatus::Pendente);
        assert!(manager.is_number_reserved("3A", 3).await);
    }

    #[tokio::test]
    async fn test_mutations_need_connection() {
        let store = Arc::new(MemorySaleStore::new());
        let manager = manager(Some(store.clone())).await;
        let sale = manager
            .create_cash_reservation(NewSale::new("3A", 4, 500))
            .await
            .unwrap()
            .into_record();

        store.set_connected(false);
        let err = manager
            .update_sale_status(&sale.id, SaleStatus::Pago, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Offline));
        assert!(matches!(manager.remove_sale(&sale.id).await, Err(SyncError::Offline)));

        // No optimistic change
        assert!(manager.is_number_reserved("3A", 4).await);
    }

    #[tokio::test]
    async fn test_remove_sale_frees_number() {
        let store = Arc::new(MemorySaleStore::new());
        let manager = manager(Some(store.clone())).await;
        let sale = manager
            .create_cash_reservation(NewSale::new("3TECH", 10, 500))
            .await
            .unwrap()
            .into_record();
        assert!(!manager.get_available_numbers("3TECH").await.unwrap().contains(&10));

        manager.remove_sale(&sale.id).await.unwrap();
        assert!(manager.get_available_numbers("3TECH").await.unwrap().contains(&10));
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_admin_login() {
        let manager = manager(None).await;
        assert!(!manager.is_admin());

        assert!(matches!(manager.login("errada").await, Err(SyncError::InvalidPassword)));
        manager.login("segredo").await.unwrap();
        assert!(manager.is_admin());
        assert!(manager.database().session().is_admin().await.unwrap());

        manager.logout().await.unwrap();
        assert!(!manager.is_admin());
    }

    #[tokio::test]
    async fn test_admin_flag_survives_restart() {
        let manager = manager(None).await;
        manager.login("segredo").await.unwrap();

        let restarted = RaffleManager::new(
            Arc::new(manager.config().clone()),
            manager.database().clone(),
            None,
        );
        restarted.load_cache().await.unwrap();
        assert!(restarted.is_admin());
    }

    #[tokio::test]
    async fn test_summary_and_expired_cash() {
        let manager = manager(None).await;
        manager
            .confirm_payment_and_send(NewSale::new("3A", 1, 500))
            .await
            .unwrap();
        manager
            .create_cash_reservation(NewSale::new("3A", 2, 500))
            .await
            .unwrap();

        let summary = manager.summary().await;
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].turma, "3A");
        assert_eq!(summary[0].sold, 1);
        assert_eq!(summary[0].reserved, 1);
        assert_eq!(summary[0].available, 198);
        assert_eq!(summary[0].paid_revenue.cents(), 500);

        assert!(manager.expired_cash_reservations(Utc::now()).await.is_empty());
        let later = Utc::now() + Duration::hours(25);
        assert_eq!(manager.expired_cash_reservations(later).await.len(), 1);

        assert_eq!(manager.recent_sales(Duration::minutes(5)).await.len(), 2);
    }
}
