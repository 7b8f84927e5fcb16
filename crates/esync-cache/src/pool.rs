//! Database connection pool management
//!
//! Wraps SQLx's `SqlitePool`:
//! - Creates the database directory on first use
//! - WAL journal mode, so status reads do not block job writes
//! - Applies the bundled schema migrations on every open
//! - In-memory mode for tests

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

/// Bundled migrations, applied in order; each must be idempotent
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_sync_jobs",
    include_str!("migrations/0001_sync_jobs.sql"),
)];

/// Pool of SQLite connections to the job database
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the database at `db_path` and migrates it
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the directory or connection
    /// cannot be created, or `CacheError::MigrationFailed` if a migration fails.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to open job database at {}: {e}",
                    db_path.display()
                ))
            })?;

        Self::migrate(&pool).await?;
        tracing::info!(path = %db_path.display(), "Job database ready");
        Ok(Self { pool })
    }

    /// Creates an in-memory database for tests
    ///
    /// Limited to one connection: each SQLite in-memory connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::migrate(&pool).await?;
        tracing::debug!("In-memory job database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for open connections to finish and closes the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), CacheError> {
        for (name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql).execute(pool).await.map_err(|e| {
                CacheError::MigrationFailed(format!("Migration {name} failed: {e}"))
            })?;
            tracing::debug!(migration = name, "Applied migration");
        }
        Ok(())
    }
}
