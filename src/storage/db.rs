use std::{str::FromStr, sync::Arc, time::Duration};

use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use tracing::{info, instrument};

use crate::error::Result;

const MAX_CONNECTIONS: u32 = 5;

/// DatabaseManager handles SQLite connection pooling
#[derive(Clone)]
pub struct DatabaseManager {
    /// Connection pool for SQLite
    pub pool: Pool<Sqlite>,
    /// Connection URL of the database
    pub db_path: Arc<str>,
}

impl DatabaseManager {
    /// Creates a new DatabaseManager with a connection pool to the specified database
    #[instrument(err)]
    pub async fn new(db_path: &str) -> Result<Self> {
        info!("Initializing database at: {}", db_path);

        let options = SqliteConnectOptions::from_str(db_path)?
            .foreign_keys(true)
            // Create the database if it doesn't exist
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL is safe with WAL and avoids an fsync per commit
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to an in-memory database opens its own empty database,
        // so the pool must keep exactly one connection alive for its whole life
        let pool = if Self::is_in_memory(db_path) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect_with(options)
                .await?
        };

        Ok(Self {
            pool,
            db_path: db_path.into(),
        })
    }

    /// Get database path
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn is_in_memory(db_path: &str) -> bool {
        db_path.contains(":memory:") || db_path.contains("mode=memory")
    }

    /// Fresh in-memory database for tests
    #[cfg(test)]
    pub(crate) async fn setup_test_db() -> DatabaseManager {
        DatabaseManager::new("sqlite::memory:")
            .await
            .expect("Failed to initialize database")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_survives_across_queries() {
        let db = DatabaseManager::setup_test_db().await;
        sqlx::query("CREATE TABLE t (x INTEGER)").execute(&db.pool).await.unwrap();
        sqlx::query("INSERT INTO t (x) VALUES (1)").execute(&db.pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.db_path(), "sqlite::memory:");
    }
}
