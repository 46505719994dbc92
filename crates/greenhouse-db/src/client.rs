//! Database client and connection management

use crate::{schema, DbError, DbResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Database client wrapping an sqlx connection pool
#[derive(Clone)]
pub struct DbClient {
    pool: SqlitePool,
}

impl DbClient {
    /// Connect to the database at `database_url` and create missing tables
    pub async fn new(database_url: &str, max_connections: u32) -> DbResult<Self> {
        if max_connections == 0 {
            return Err(DbError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(opts)
            .await?;

        let client = Self { pool };
        client.migrate().await?;
        info!(url = %database_url, "database ready");
        Ok(client)
    }

    /// Private in-memory database, used by tests and dry runs.
    ///
    /// Every SQLite connection to `:memory:` opens a distinct database, so
    /// the pool is pinned to a single connection that never expires.
    pub async fn in_memory() -> DbResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let client = Self { pool };
        client.migrate().await?;
        Ok(client)
    }

    /// Get reference to underlying pool for direct queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the collections if they do not exist yet
    pub async fn migrate(&self) -> DbResult<()> {
        for statement in schema::MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = schema::MIGRATIONS.len(), "schema applied");
        Ok(())
    }

    /// Test the database connection
    pub async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the connection pool gracefully
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_client_is_migrated() {
        let client = DbClient::in_memory().await.unwrap();
        client.ping().await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(client.pool())
                .await
                .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();

        for table in [
            schema::tables::USERS,
            schema::tables::MEASURES,
            schema::tables::FARMBOT_LOGS,
            schema::tables::OCCUPANCY_MODULES,
        ] {
            assert!(names.iter().any(|n| n == table), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_zero_connections_rejected() {
        let err = DbClient::new("sqlite::memory:", 0).await.err().unwrap();
        assert!(matches!(err, DbError::ConfigError(_)));
    }
}
