//! # Sale Cache Repository
//!
//! Persists the RaffleManager's merged cache so a restarted session can
//! serve availability before the first remote snapshot arrives, and so
//! unsynced local records survive until the resync sweep pushes them.
//!
//! Every write is a whole-cache replacement inside one transaction,
//! mirroring how the in-memory ledger is replaced on each merge.

use sqlx::SqlitePool;
use tracing::debug;

use rifa_core::SaleRecord;

use super::{rows_to_records, upsert_sale, SaleRow, SALE_COLUMNS};
use crate::error::DbResult;

const TABLE: &str = "sale_cache";

/// Repository for the local sale cache.
#[derive(Debug, Clone)]
pub struct SaleCacheRepository {
    pool: SqlitePool,
}

impl SaleCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleCacheRepository { pool }
    }

    /// Loads every cached record, newest first.
    pub async fn load_all(&self) -> DbResult<Vec<SaleRecord>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM {TABLE} ORDER BY timestamp DESC, id ASC");
        let rows: Vec<SaleRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows_to_records(rows)
    }

    /// Replaces the whole cache with `records`.
    pub async fn replace_all(&self, records: &[SaleRecord]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sale_cache")
            .execute(&mut *tx)
            .await?;

        for record in records {
            upsert_sale(&mut *tx, TABLE, record).await?;
        }

        tx.commit().await?;

        debug!(count = records.len(), "Sale cache persisted");
        Ok(())
    }

    /// Records still waiting for the remote store.
    pub async fn load_unsynced(&self) -> DbResult<Vec<SaleRecord>> {
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM {TABLE} WHERE synced = 0 ORDER BY timestamp DESC, id ASC"
        );
        let rows: Vec<SaleRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows_to_records(rows)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sale_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::record;
    use crate::{Database, DbConfig};
    use rifa_core::{PaymentMethod, SaleStatus};

    #[tokio::test]
    async fn test_replace_and_load() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sale_cache();

        let mut cash = record("r1", "3A", 42, SaleStatus::Pendente, true, 0);
        cash.payment_method = PaymentMethod::Dinheiro;
        cash.expires_at = Some(cash.timestamp + chrono::Duration::hours(24));
        cash.local_id = Some("local-x".to_string());

        let records = vec![
            record("local-1", "3B", 17, SaleStatus::Pago, false, 5),
            cash.clone(),
        ];
        repo.replace_all(&records).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "local-1");
        assert_eq!(loaded[1], cash);

        let unsynced = repo.load_unsynced().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].turma, "3B");
    }

    #[tokio::test]
    async fn test_replace_all_drops_previous_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sale_cache();

        repo.replace_all(&[record("r1", "3A", 1, SaleStatus::Pago, true, 0)])
            .await
            .unwrap();
        repo.replace_all(&[record("r2", "3A", 2, SaleStatus::Pago, true, 0)])
            .await
            .unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.load_all().await.unwrap()[0].id, "r2");

        repo.replace_all(&[]).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
