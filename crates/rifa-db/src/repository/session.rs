//! # Session Repository
//!
//! Small values that make the storefront feel continuous across restarts:
//! the admin flag, the last sync time, and the checkout form state.
//!
//! ## Keys
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────┐
//! │ key                  │ value                                        │
//! ├──────────────────────┼──────────────────────────────────────────────┤
//! │ admin_session        │ "true" (absent when logged out)              │
//! │ last_sync            │ RFC 3339 timestamp                           │
//! │ cart                 │ Cart JSON                                    │
//! │ customer_info        │ CustomerInfo JSON                            │
//! │ delivery_preference  │ DeliveryPreference JSON                      │
//! │ payment_preference   │ PaymentMethod JSON                           │
//! │ cash_amount          │ Money JSON (centavos)                        │
//! │ last_order           │ Order JSON                                   │
//! └──────────────────────┴──────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Well-known kv_store keys.
pub mod keys {
    pub const ADMIN_SESSION: &str = "admin_session";
    pub const LAST_SYNC: &str = "last_sync";
    pub const CART: &str = "cart";
    pub const CUSTOMER_INFO: &str = "customer_info";
    pub const DELIVERY_PREFERENCE: &str = "delivery_preference";
    pub const PAYMENT_PREFERENCE: &str = "payment_preference";
    pub const CASH_AMOUNT: &str = "cash_amount";
    pub const LAST_ORDER: &str = "last_order";
}

/// Repository for the key-value session store.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Raw access
    // -------------------------------------------------------------------------

    pub async fn get_raw(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_raw(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(key = %key, "Session value stored");
        Ok(())
    }

    /// Removes a key. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // JSON values
    // -------------------------------------------------------------------------

    /// Reads a JSON value.
    ///
    /// A value that no longer parses as `T` is reported as `Corrupt`
    /// rather than silently dropped.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DbError::corrupt(format!("kv value '{key}'"), e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DbResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw).await
    }

    // -------------------------------------------------------------------------
    // Typed helpers
    // -------------------------------------------------------------------------

    pub async fn is_admin(&self) -> DbResult<bool> {
        Ok(self.get_raw(keys::ADMIN_SESSION).await?.as_deref() == Some("true"))
    }

    pub async fn set_admin(&self, admin: bool) -> DbResult<()> {
        if admin {
            self.set_raw(keys::ADMIN_SESSION, "true").await
        } else {
            self.remove(keys::ADMIN_SESSION).await.map(|_| ())
        }
    }

    pub async fn last_sync(&self) -> DbResult<Option<DateTime<Utc>>> {
        match self.get_raw(keys::LAST_SYNC).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| DbError::corrupt("last_sync", e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.set_raw(keys::LAST_SYNC, &at.to_rfc3339()).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::TimeZone;
    use rifa_core::{CustomerInfo, PaymentMethod};

    async fn repo() -> SessionRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().session()
    }

    #[tokio::test]
    async fn test_admin_flag() {
        let repo = repo().await;
        assert!(!repo.is_admin().await.unwrap());

        repo.set_admin(true).await.unwrap();
        assert!(repo.is_admin().await.unwrap());
        assert_eq!(repo.get_raw(keys::ADMIN_SESSION).await.unwrap().as_deref(), Some("true"));

        repo.set_admin(false).await.unwrap();
        assert!(!repo.is_admin().await.unwrap());
        assert_eq!(repo.get_raw(keys::ADMIN_SESSION).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_values() {
        let repo = repo().await;
        let customer = CustomerInfo {
            nome: "Ana".to_string(),
            telefone: "11987654321".to_string(),
            turma: None,
            endereco: Some("Rua A, 10".to_string()),
        };

        repo.set_json(keys::CUSTOMER_INFO, &customer).await.unwrap();
        repo.set_json(keys::PAYMENT_PREFERENCE, &PaymentMethod::Dinheiro)
            .await
            .unwrap();

        let loaded: Option<CustomerInfo> = repo.get_json(keys::CUSTOMER_INFO).await.unwrap();
        assert_eq!(loaded, Some(customer));
        let method: Option<PaymentMethod> = repo.get_json(keys::PAYMENT_PREFERENCE).await.unwrap();
        assert_eq!(method, Some(PaymentMethod::Dinheiro));

        let missing: Option<CustomerInfo> = repo.get_json(keys::LAST_ORDER).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_value_is_an_error() {
        let repo = repo().await;
        repo.set_raw(keys::CUSTOMER_INFO, "not json").await.unwrap();

        let result: DbResult<Option<CustomerInfo>> = repo.get_json(keys::CUSTOMER_INFO).await;
        assert!(matches!(result, Err(DbError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_last_sync() {
        let repo = repo().await;
        assert_eq!(repo.last_sync().await.unwrap(), None);

        let at = Utc.with_ymd_and_hms(2026, 5, 10, 15, 30, 0).unwrap();
        repo.set_last_sync(at).await.unwrap();
        assert_eq!(repo.last_sync().await.unwrap(), Some(at));
    }
}
