//! # Schema Migrations
//!
//! SQL files under `migrations/sqlite/` at the workspace root, embedded at
//! compile time. Applied in file order on every open; sqlx records them in
//! `_sqlx_migrations` so reruns are no-ops.
//!
//! | File                     | Tables                             |
//! |--------------------------|------------------------------------|
//! | `001_initial_schema.sql` | `sale_cache`, `kv_store`, `hub_sales` |
//!
//! Add new behaviour as a new numbered file. A shipped file is never
//! edited: kiosks in the field have already recorded its checksum.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies pending migrations and returns how many are now recorded.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<usize> {
    MIGRATOR.run(pool).await?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;
    let applied = usize::try_from(applied).unwrap_or_default();

    if applied < MIGRATOR.migrations.len() {
        info!(applied, embedded = MIGRATOR.migrations.len(), "Some migrations not recorded");
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_rerun_is_a_noop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let first = run_migrations(db.pool()).await.unwrap();
        let second = run_migrations(db.pool()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, MIGRATOR.migrations.len());
    }
}
