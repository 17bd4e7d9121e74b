//! # Hub Sales Repository
//!
//! Durable copy of the collection the sale hub serves. The hub keeps the
//! authoritative set in memory and writes through to this table, so a
//! restarted hub resumes with every sale it acknowledged.

use sqlx::SqlitePool;
use tracing::debug;

use rifa_core::SaleRecord;

use super::{rows_to_records, upsert_sale, SaleRow, SALE_COLUMNS};
use crate::error::DbResult;

const TABLE: &str = "hub_sales";

#[derive(Debug, Clone)]
pub struct HubSalesRepository {
    pool: SqlitePool,
}

impl HubSalesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        HubSalesRepository { pool }
    }

    /// Loads the collection, newest first.
    pub async fn load_all(&self) -> DbResult<Vec<SaleRecord>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM {TABLE} ORDER BY timestamp DESC, id ASC");
        let rows: Vec<SaleRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows_to_records(rows)
    }

    /// Inserts a new sale or overwrites an updated one.
    pub async fn upsert(&self, record: &SaleRecord) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_sale(&mut *conn, TABLE, record).await?;

        debug!(id = %record.id, turma = %record.turma, numero = record.numero, "Hub sale stored");
        Ok(())
    }

    /// Deletes a sale. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM hub_sales WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
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
    use rifa_core::SaleStatus;

    #[tokio::test]
    async fn test_upsert_overwrites_and_delete() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.hub_sales();

        let mut sale = record("srv-1", "3A", 42, SaleStatus::Pendente, true, 0);
        repo.upsert(&sale).await.unwrap();

        sale.status = SaleStatus::Pago;
        repo.upsert(&sale).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, SaleStatus::Pago);

        assert!(repo.delete("srv-1").await.unwrap());
        assert!(!repo.delete("srv-1").await.unwrap());
        assert!(repo.load_all().await.unwrap().is_empty());
    }
}
