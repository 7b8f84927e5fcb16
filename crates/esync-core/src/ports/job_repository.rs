//! Job repository port (driven/secondary port)
//!
//! Optional persistence for `SyncJob` snapshots so job status survives a
//! process restart. The engine works without one.

use crate::domain::{JobId, SyncJob};

/// Port trait for persisting sync job snapshots
///
/// ## Implementation Notes
///
/// - `save_job` is an upsert keyed by the job id; the stored snapshot is
///   replaced wholesale.
/// - Uses `anyhow::Result` because storage errors are adapter-specific and
///   the engine only logs them.
#[async_trait::async_trait]
pub trait IJobRepository: Send + Sync {
    /// Saves a job snapshot (insert or replace)
    async fn save_job(&self, job: &SyncJob) -> anyhow::Result<()>;

    /// Loads a job snapshot by id
    async fn get_job(&self, id: &JobId) -> anyhow::Result<Option<SyncJob>>;

    /// Lists the most recently created jobs, newest first
    async fn list_jobs(&self, limit: u32) -> anyhow::Result<Vec<SyncJob>>;
}
