//! SQLite implementation of IJobRepository
//!
//! Each job is one row. The row's `snapshot` column holds the whole
//! `SyncJob` as JSON and is the only thing read back; the other columns
//! exist for ordering and for ad-hoc inspection with the `sqlite3` shell.
//!
//! ## Type Mapping
//!
//! | Domain Type    | SQL Type | Strategy                                   |
//! |----------------|----------|--------------------------------------------|
//! | JobId          | TEXT     | UUID string via `.to_string()`             |
//! | RemotePath     | TEXT     | String via `.as_str()`                     |
//! | JobStatus      | TEXT     | `as_str()` (snake_case)                    |
//! | DateTime<Utc>  | TEXT     | RFC 3339, fixed microsecond precision      |
//! | SyncJob        | TEXT     | serde_json serialization                   |

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use esync_core::domain::{JobId, JobStatus, SyncJob};
use esync_core::ports::IJobRepository;

use crate::CacheError;

/// SQLite-backed job repository
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Lists the most recent jobs with a given status, newest first
    pub async fn list_jobs_with_status(
        &self,
        status: JobStatus,
        limit: u32,
    ) -> Result<Vec<SyncJob>, CacheError> {
        let rows = sqlx::query(
            "SELECT snapshot FROM sync_jobs WHERE status = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Deletes finished jobs created before `cutoff`, returning how many were removed
    pub async fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CacheError> {
        let result = sqlx::query(
            "DELETE FROM sync_jobs WHERE created_at < ? \
             AND status NOT IN ('queued', 'running')",
        )
        .bind(timestamp(cutoff))
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, "Pruned finished jobs");
        }
        Ok(removed)
    }
}

/// Fixed-width timestamps keep lexical order equal to time order
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn job_from_row(row: &SqliteRow) -> Result<SyncJob, CacheError> {
    let snapshot: String = row.try_get("snapshot")?;
    Ok(serde_json::from_str(&snapshot)?)
}

#[async_trait::async_trait]
impl IJobRepository for SqliteJobRepository {
    async fn save_job(&self, job: &SyncJob) -> anyhow::Result<()> {
        let id = job.id().to_string();
        let snapshot = serde_json::to_string(job)
            .map_err(|e| anyhow::anyhow!("Failed to serialize job {id}: {e}"))?;

        sqlx::query(
            "INSERT OR REPLACE INTO sync_jobs \
             (id, source_root, destination_root, status, total_operations, \
              completed_operations, bytes_transferred, created_at, finished_at, snapshot) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(job.source_root().as_str())
        .bind(job.destination_root().as_str())
        .bind(job.status().as_str())
        .bind(i64::try_from(job.total_operations()).unwrap_or(i64::MAX))
        .bind(i64::try_from(job.completed_operations()).unwrap_or(i64::MAX))
        .bind(i64::try_from(job.bytes_transferred()).unwrap_or(i64::MAX))
        .bind(timestamp(job.created_at()))
        .bind(job.finished_at().map(timestamp))
        .bind(&snapshot)
        .execute(&self.pool)
        .await?;

        tracing::trace!(job_id = %id, status = %job.status(), "Saved job");
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> anyhow::Result<Option<SyncJob>> {
        let row = sqlx::query("SELECT snapshot FROM sync_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(job_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_jobs(&self, limit: u32) -> anyhow::Result<Vec<SyncJob>> {
        let rows = sqlx::query(
            "SELECT snapshot FROM sync_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(job_from_row(row)?);
        }
        Ok(jobs)
    }
}
