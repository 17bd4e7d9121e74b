//! # Database Error Types
//!
//! Everything that can go wrong between a repository call and the SQLite
//! file.
//!
//! ```text
//!   sqlx::Error / MigrateError / serde_json::Error
//!        │
//!        ▼
//!   DbError ──► SyncError::DatabaseError (rifa-sync)
//!        │
//!        ▼
//!   logged by the caller; the in-memory sale cache stays the
//!   session's source of truth until the next successful write
//! ```

use thiserror::Error;

/// Storage failures for the sale cache, the kv store and the hub collection.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database file could not be opened or created.
    #[error("Cannot open sale database: {0}")]
    Open(String),

    /// The pool was closed by `Database::close`.
    #[error("Sale database is closed")]
    Closed,

    /// Every connection stayed busy past the acquire timeout.
    #[error("Sale database busy")]
    Busy,

    #[error("Schema migration failed: {0}")]
    Migration(String),

    /// A UNIQUE constraint rejected the write. `target` is `table.column`.
    #[error("Duplicate value for {target}")]
    Duplicate { target: String },

    #[error("Query failed: {0}")]
    Query(String),

    /// A stored row could not be turned back into a domain value.
    ///
    /// Seen when a kv entry holds JSON of another shape (an older cart
    /// format, say) or a cached row carries a negative raffle number.
    #[error("Corrupt {what}: {reason}")]
    Corrupt { what: String, reason: String },

    #[error("Cannot encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DbError {
    pub fn corrupt(what: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::Corrupt {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// True when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                match msg.strip_prefix("UNIQUE constraint failed: ") {
                    Some(target) => DbError::Duplicate {
                        target: target.to_string(),
                    },
                    None => DbError::Query(msg.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut => DbError::Busy,
            sqlx::Error::PoolClosed => DbError::Closed,
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::corrupt(format!("column {index}"), source.to_string())
            }
            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
