//! # Sale Ledger
//!
//! The local view of every raffle sale, and the rule that reconciles it
//! with the remote feed.
//!
//! ## Merge Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  merge_snapshot(local cache, remote snapshot)                          │
//! │                                                                         │
//! │   local cache ──► keep only synced = false ──┐                         │
//! │                                               ├──► candidates           │
//! │   remote snapshot ────────────────────────────┘        │               │
//! │                                                         ▼               │
//! │   group by (turma, numero), keep the best of each group:               │
//! │     1. synced active   beats everything                                │
//! │     2. unsynced active beats a cancelled record                        │
//! │     3. synced          beats unsynced                                  │
//! │     4. newer timestamp beats older                                     │
//! │                                                         │               │
//! │                                                         ▼               │
//! │   sort newest first ──► new cache (whole replacement)                  │
//! │                                                                         │
//! │   Unsynced locals that lost to another record are returned as          │
//! │   `superseded` so the caller can tell the buyer.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applying the same snapshot twice yields the same cache.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{SaleRecord, SaleStatus, TurmaPool};

// =============================================================================
// Merge
// =============================================================================

/// Result of reconciling the local cache with a remote snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The new cache, newest first.
    pub records: Vec<SaleRecord>,
    /// Unsynced local records that lost their number to another record.
    pub superseded: Vec<SaleRecord>,
}

/// Reconciles the local cache with a full remote snapshot.
///
/// Synced records in `local` are discarded: the snapshot is the
/// authority for everything the remote store has acknowledged.
pub fn merge_snapshot(local: &[SaleRecord], remote: &[SaleRecord]) -> MergeOutcome {
    // A pending record whose promoted copy is already in the snapshot is
    // done, not superseded.
    let pending = local.iter().filter(|p| {
        !p.synced
            && !remote
                .iter()
                .any(|r| r.local_id.as_deref() == Some(p.id.as_str()))
    });

    dedupe(pending.cloned().chain(remote.iter().cloned()))
}

/// Keeps the best record per `(turma, numero)` and sorts newest first.
fn dedupe(candidates: impl Iterator<Item = SaleRecord>) -> MergeOutcome {
    let mut best: HashMap<(String, u32), SaleRecord> = HashMap::new();
    let mut superseded = Vec::new();

    for candidate in candidates {
        let key = (candidate.turma.clone(), candidate.numero);
        match best.remove(&key) {
            None => {
                best.insert(key, candidate);
            }
            Some(current) => {
                let (winner, loser) = if outranks(&candidate, &current) {
                    (candidate, current)
                } else {
                    (current, candidate)
                };
                if !loser.synced && !winner.matches_id(&loser.id) {
                    superseded.push(loser);
                }
                best.insert(key, winner);
            }
        }
    }

    let mut records: Vec<SaleRecord> = best.into_values().collect();
    sort_newest_first(&mut records);
    sort_newest_first(&mut superseded);

    MergeOutcome {
        records,
        superseded,
    }
}

/// Total order used to pick the record that keeps a number.
fn rank(record: &SaleRecord) -> u8 {
    match (record.synced, record.is_active()) {
        (true, true) => 3,
        (false, true) => 2,
        (true, false) => 1,
        (false, false) => 0,
    }
}

fn outranks(a: &SaleRecord, b: &SaleRecord) -> bool {
    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.id.cmp(&b.id))
        == Ordering::Greater
}

fn sort_newest_first(records: &mut [SaleRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

// =============================================================================
// Summary
// =============================================================================

/// Dashboard numbers for one turma.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TurmaSummary {
    pub turma: String,
    pub total_numbers: usize,
    pub sold: usize,
    pub reserved: usize,
    pub available: usize,
    pub cancelled: usize,
    /// Sum of `pago` ticket prices.
    pub paid_revenue: Money,
    /// Sum of `pendente`/`reservado` ticket prices.
    pub pending_revenue: Money,
}

// =============================================================================
// Sale Ledger
// =============================================================================

/// In-memory cache of sale records, newest first.
///
/// Every mutation replaces the whole vector, so a caller holding the
/// ledger behind a lock sees merges as atomic.
#[derive(Debug, Clone, Default)]
pub struct SaleLedger {
    records: Vec<SaleRecord>,
}

impl SaleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from a persisted cache, normalizing it through the
    /// merge rule.
    pub fn from_records(records: Vec<SaleRecord>) -> Self {
        Self {
            records: dedupe(records.into_iter()).records,
        }
    }

    pub fn records(&self) -> &[SaleRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Replaces the cache with the merge of itself and a remote snapshot.
    ///
    /// Returns the unsynced records that lost their number.
    pub fn apply_snapshot(&mut self, remote: &[SaleRecord]) -> Vec<SaleRecord> {
        let outcome = merge_snapshot(&self.records, remote);
        self.records = outcome.records;
        outcome.superseded
    }

    /// Adds or replaces a single record.
    ///
    /// Any record sharing its id (or the local alias it was promoted from)
    /// is replaced; other records for the same number compete under the
    /// merge rule.
    pub fn absorb(&mut self, record: SaleRecord) -> Vec<SaleRecord> {
        let alias = record.local_id.clone();
        let id = record.id.clone();

        let others = self
            .records
            .drain(..)
            .filter(|r| r.id != id && Some(&r.id) != alias.as_ref());
        let outcome = dedupe(others.chain(std::iter::once(record)));

        self.records = outcome.records;
        outcome.superseded
    }

    /// Removes a record by id or local alias.
    pub fn remove(&mut self, id: &str) -> Option<SaleRecord> {
        let index = self.records.iter().position(|r| r.matches_id(id))?;
        Some(self.records.remove(index))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Looks a record up by id or local alias.
    pub fn find(&self, id: &str) -> Option<&SaleRecord> {
        self.records.iter().find(|r| r.matches_id(id))
    }

    /// Any record for the number is `pago`.
    pub fn is_number_sold(&self, turma: &str, numero: u32) -> bool {
        self.records
            .iter()
            .any(|r| r.is_for(turma, numero) && r.status == SaleStatus::Pago)
    }

    /// Any record for the number is `pendente` or `reservado`.
    pub fn is_number_reserved(&self, turma: &str, numero: u32) -> bool {
        self.records
            .iter()
            .any(|r| r.is_for(turma, numero) && r.status.is_held())
    }

    /// The record currently holding the number, synced or not.
    pub fn active_sale(&self, turma: &str, numero: u32) -> Option<&SaleRecord> {
        self.records
            .iter()
            .find(|r| r.is_for(turma, numero) && r.is_active())
    }

    /// The acknowledged record currently holding the number.
    ///
    /// This is the pre-write recheck: unsynced records never block
    /// another write.
    pub fn active_synced_sale(&self, turma: &str, numero: u32) -> Option<&SaleRecord> {
        self.records
            .iter()
            .find(|r| r.is_for(turma, numero) && r.is_active() && r.synced)
    }

    /// Numbers of the pool not held by any active record, ascending.
    ///
    /// Cancelled sales free their number.
    pub fn available_numbers(&self, pool: &TurmaPool) -> Vec<u32> {
        let mut taken = vec![false; pool.size()];
        for record in &self.records {
            if record.turma == pool.code && record.is_active() && pool.contains(record.numero) {
                taken[(record.numero - pool.first) as usize] = true;
            }
        }

        pool.numbers()
            .zip(taken)
            .filter_map(|(n, t)| (!t).then_some(n))
            .collect()
    }

    /// Records still waiting for the remote store to acknowledge them.
    pub fn unsynced(&self) -> Vec<SaleRecord> {
        self.records.iter().filter(|r| !r.synced).cloned().collect()
    }

    pub fn unsynced_count(&self) -> usize {
        self.records.iter().filter(|r| !r.synced).count()
    }

    /// Sales created within `window` of `now`, newest first.
    pub fn recent(&self, now: DateTime<Utc>, window: Duration) -> Vec<SaleRecord> {
        let since = now - window;
        self.records
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Pending cash sales whose payment window has passed.
    pub fn expired_cash(&self, now: DateTime<Utc>) -> Vec<SaleRecord> {
        self.records
            .iter()
            .filter(|r| r.is_expired_cash(now))
            .cloned()
            .collect()
    }

    /// Sales belonging to one checkout order.
    pub fn by_order(&self, order_id: &str) -> Vec<SaleRecord> {
        self.records
            .iter()
            .filter(|r| r.order_id.as_deref() == Some(order_id))
            .cloned()
            .collect()
    }

    /// Dashboard numbers for a pool.
    pub fn summary(&self, pool: &TurmaPool) -> TurmaSummary {
        let mut summary = TurmaSummary {
            turma: pool.code.clone(),
            total_numbers: pool.size(),
            ..Default::default()
        };

        for record in self.records.iter().filter(|r| r.turma == pool.code) {
            match record.status {
                SaleStatus::Pago => {
                    summary.sold += 1;
                    summary.paid_revenue += record.price();
                }
                SaleStatus::Pendente | SaleStatus::Reservado => {
                    summary.reserved += 1;
                    summary.pending_revenue += record.price();
                }
                SaleStatus::Cancelado => summary.cancelled += 1,
            }
        }

        summary.available = self.available_numbers(pool).len();
        summary
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewSale, PaymentMethod};

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes)
    }

    fn synced(id: &str, turma: &str, numero: u32, status: SaleStatus, minute: i64) -> SaleRecord {
        let mut sale = NewSale::new(turma, numero, 500);
        sale.status = status;
        sale.into_record(id.to_string(), at(minute), true)
    }

    fn local(id: &str, turma: &str, numero: u32, minute: i64) -> SaleRecord {
        NewSale::new(turma, numero, 500).into_record(id.to_string(), at(minute), false)
    }

    #[test]
    fn test_merge_is_idempotent() {
        let cache = vec![local("local-1", "3A", 1, 0)];
        let snapshot = vec![
            synced("r1", "3A", 2, SaleStatus::Pago, 1),
            synced("r2", "3B", 7, SaleStatus::Pendente, 2),
        ];

        let once = merge_snapshot(&cache, &snapshot);
        let twice = merge_snapshot(&once.records, &snapshot);

        assert_eq!(once.records, twice.records);
        assert_eq!(once.records.len(), 3);
        assert!(twice.superseded.is_empty());
    }

    #[test]
    fn test_synced_supersedes_local() {
        let cache = vec![local("local-1", "3A", 42, 5)];
        let snapshot = vec![synced("r1", "3A", 42, SaleStatus::Pago, 1)];

        let outcome = merge_snapshot(&cache, &snapshot);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].id, "r1");
        assert_eq!(outcome.superseded.len(), 1);
        assert_eq!(outcome.superseded[0].id, "local-1");
    }

    #[test]
    fn test_promoted_local_is_not_superseded() {
        let cache = vec![local("local-1", "3A", 42, 0)];
        let mut promoted = synced("r1", "3A", 42, SaleStatus::Pendente, 0);
        promoted.local_id = Some("local-1".to_string());

        let outcome = merge_snapshot(&cache, &[promoted]);

        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].matches_id("local-1"));
        assert!(outcome.superseded.is_empty());
    }

    #[test]
    fn test_cancelled_remote_does_not_supersede_active_local() {
        let cache = vec![local("local-1", "3A", 9, 10)];
        let snapshot = vec![synced("r1", "3A", 9, SaleStatus::Cancelado, 1)];

        let outcome = merge_snapshot(&cache, &snapshot);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].id, "local-1");
    }

    #[test]
    fn test_synced_records_absent_from_snapshot_are_dropped() {
        let cache = vec![synced("r-old", "3A", 3, SaleStatus::Pago, 0)];
        let outcome = merge_snapshot(&cache, &[]);
        assert!(outcome.records.is_empty());
        assert!(outcome.superseded.is_empty());
    }

    #[test]
    fn test_newest_first_and_newer_wins() {
        let snapshot = vec![
            synced("r1", "3A", 5, SaleStatus::Pago, 0),
            synced("r2", "3A", 5, SaleStatus::Pago, 3),
            synced("r3", "3A", 6, SaleStatus::Pago, 1),
        ];
        let outcome = merge_snapshot(&[], &snapshot);

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
    }

    #[test]
    fn test_sold_and_reserved_queries() {
        let ledger = SaleLedger::from_records(vec![
            synced("r1", "3A", 42, SaleStatus::Pendente, 0),
            synced("r2", "3A", 43, SaleStatus::Pago, 0),
            synced("r3", "3A", 44, SaleStatus::Cancelado, 0),
        ]);

        assert!(!ledger.is_number_sold("3A", 42));
        assert!(ledger.is_number_reserved("3A", 42));
        assert!(ledger.is_number_sold("3A", 43));
        assert!(!ledger.is_number_reserved("3A", 43));
        assert!(!ledger.is_number_sold("3A", 44));
        assert!(!ledger.is_number_reserved("3A", 44));
        assert!(!ledger.is_number_sold("3B", 43));
    }

    #[test]
    fn test_available_numbers_frees_cancelled() {
        let pool = TurmaPool::new("3A", 1, 5);
        let ledger = SaleLedger::from_records(vec![
            synced("r1", "3A", 2, SaleStatus::Pago, 0),
            synced("r2", "3A", 3, SaleStatus::Cancelado, 0),
            local("local-1", "3A", 4, 0),
            synced("r3", "3B", 1, SaleStatus::Pago, 0),
        ]);

        assert_eq!(ledger.available_numbers(&pool), vec![1, 3, 5]);
    }

    #[test]
    fn test_recheck_ignores_unsynced() {
        let ledger = SaleLedger::from_records(vec![local("local-1", "3B", 17, 0)]);
        assert!(ledger.active_sale("3B", 17).is_some());
        assert!(ledger.active_synced_sale("3B", 17).is_none());
    }

    #[test]
    fn test_absorb_replaces_local_alias() {
        let mut ledger = SaleLedger::from_records(vec![local("local-1", "3A", 42, 0)]);

        let mut ack = synced("r1", "3A", 42, SaleStatus::Pendente, 0);
        ack.local_id = Some("local-1".to_string());
        let superseded = ledger.absorb(ack);

        assert!(superseded.is_empty());
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.records()[0].id, "r1");
        assert_eq!(ledger.find("local-1").map(|r| r.id.as_str()), Some("r1"));
        assert_eq!(ledger.unsynced_count(), 0);
    }

    #[test]
    fn test_absorb_keeps_one_record_per_number() {
        let mut ledger = SaleLedger::new();
        ledger.absorb(synced("r1", "3A", 42, SaleStatus::Pendente, 0));
        ledger.absorb(synced("r1", "3A", 42, SaleStatus::Pago, 0));

        let active: Vec<_> = ledger
            .records()
            .iter()
            .filter(|r| r.is_for("3A", 42) && r.is_active())
            .collect();
        assert_eq!(active.len(), 1);
        assert!(ledger.is_number_sold("3A", 42));
    }

    #[test]
    fn test_summary() {
        let pool = TurmaPool::new("3A", 1, 10);
        let ledger = SaleLedger::from_records(vec![
            synced("r1", "3A", 1, SaleStatus::Pago, 0),
            synced("r2", "3A", 2, SaleStatus::Pago, 1),
            synced("r3", "3A", 3, SaleStatus::Pendente, 2),
            synced("r4", "3A", 4, SaleStatus::Cancelado, 3),
        ]);

        let summary = ledger.summary(&pool);
        assert_eq!(summary.sold, 2);
        assert_eq!(summary.reserved, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.available, 7);
        assert_eq!(summary.paid_revenue, Money::from_cents(1000));
        assert_eq!(summary.pending_revenue, Money::from_cents(500));
    }

    #[test]
    fn test_recent_and_expired_cash() {
        let mut cash = synced("r1", "3A", 1, SaleStatus::Pendente, 0);
        cash.payment_method = PaymentMethod::Dinheiro;
        cash.expires_at = Some(at(60));
        let ledger = SaleLedger::from_records(vec![cash, synced("r2", "3A", 2, SaleStatus::Pago, 50)]);

        let recent = ledger.recent(at(55), Duration::minutes(10));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "r2");

        assert!(ledger.expired_cash(at(59)).is_empty());
        assert_eq!(ledger.expired_cash(at(61)).len(), 1);
    }
}
