//! # Repository Module
//!
//! Database repository implementations for the Rifa storefront.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories                                         │
//! │                                                                         │
//! │  RaffleManager ──► SaleCacheRepository  ──► sale_cache                 │
//! │                    ├── load_all()                                      │
//! │                    └── replace_all(records)   (one transaction)        │
//! │                                                                         │
//! │  Manager/Checkout ─► SessionRepository  ──► kv_store                   │
//! │                    ├── admin flag, last sync                           │
//! │                    └── JSON values (cart, customer, last order)        │
//! │                                                                         │
//! │  HubServer ───────► HubSalesRepository  ──► hub_sales                  │
//! │                    ├── load_all()                                      │
//! │                    ├── upsert(record)                                  │
//! │                    └── delete(id)                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `sale_cache` and `hub_sales` share a column layout, so both map rows
//! through [`SaleRow`].

pub mod hub_sales;
pub mod sale_cache;
pub mod session;

pub use hub_sales::HubSalesRepository;
pub use sale_cache::SaleCacheRepository;
pub use session::{keys, SessionRepository};

use chrono::{DateTime, Utc};
use rifa_core::{PaymentMethod, SaleRecord, SaleSource, SaleStatus};
use sqlx::SqliteConnection;

use crate::error::{DbError, DbResult};

/// Column list shared by `sale_cache` and `hub_sales`.
pub(crate) const SALE_COLUMNS: &str = "id, local_id, turma, numero, nome, telefone, status, \
     payment_method, source, order_id, price_cents, timestamp, updated_at, expires_at, synced";

/// A sale row as stored in SQLite.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SaleRow {
    id: String,
    local_id: Option<String>,
    turma: String,
    numero: i64,
    nome: Option<String>,
    telefone: Option<String>,
    status: SaleStatus,
    payment_method: PaymentMethod,
    source: SaleSource,
    order_id: Option<String>,
    price_cents: i64,
    timestamp: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    synced: bool,
}

impl TryFrom<SaleRow> for SaleRecord {
    type Error = DbError;

    fn try_from(row: SaleRow) -> DbResult<Self> {
        let numero = u32::try_from(row.numero)
            .map_err(|_| DbError::corrupt(format!("sale {}", row.id), "numero out of range"))?;

        Ok(SaleRecord {
            id: row.id,
            local_id: row.local_id,
            turma: row.turma,
            numero,
            nome: row.nome,
            telefone: row.telefone,
            status: row.status,
            payment_method: row.payment_method,
            source: row.source,
            order_id: row.order_id,
            price_cents: row.price_cents,
            timestamp: row.timestamp,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            synced: row.synced,
        })
    }
}

pub(crate) fn rows_to_records(rows: Vec<SaleRow>) -> DbResult<Vec<SaleRecord>> {
    rows.into_iter().map(SaleRecord::try_from).collect()
}

/// Inserts or replaces one sale into `table`.
pub(crate) async fn upsert_sale(
    conn: &mut SqliteConnection,
    table: &str,
    record: &SaleRecord,
) -> DbResult<()> {
    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({SALE_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
    );

    sqlx::query(&sql)
        .bind(&record.id)
        .bind(&record.local_id)
        .bind(&record.turma)
        .bind(i64::from(record.numero))
        .bind(&record.nome)
        .bind(&record.telefone)
        .bind(record.status)
        .bind(record.payment_method)
        .bind(record.source)
        .bind(&record.order_id)
        .bind(record.price_cents)
        .bind(record.timestamp)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .bind(record.synced)
        .execute(conn)
        .await?;

    Ok(())
}
