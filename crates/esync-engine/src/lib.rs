//! esync Engine - Two-sided file synchronization
//!
//! Provides:
//! - Tree enumeration and diffing of a source and a destination store
//! - A bounded worker pool with per-provider rate limiting
//! - Chunked, resumable transfers with integrity checks
//! - Job tracking with live progress snapshots
//!
//! ## Modules
//!
//! - [`diff`] - Snapshot flattening and operation planning
//! - [`executor`] - Executes one transfer task against the stores
//! - [`scheduler`] - Worker pool that admits, retries and reports tasks
//! - [`tracker`] - Single-writer job state with watch-based snapshots
//! - [`retry`] - Failure classification and exponential backoff
//! - [`rate_limit`] - Adaptive token buckets per traffic direction
//! - [`engine`] - Job API: submit, query, cancel
//! - [`memory`] - In-memory `IFileStore` for mock mode and tests

pub mod diff;
pub mod engine;
pub mod executor;
pub mod memory;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod tracker;

pub use diff::{DiffError, DiffOptions, Snapshot, TreeSide};
pub use engine::{EngineSettings, SyncEngine};
pub use executor::{TransferError, TransferExecutor, TransferReport};
pub use scheduler::{TaskEvent, TransferScheduler};
pub use tracker::JobTracker;

use esync_core::domain::JobId;
use thiserror::Error;

/// Errors surfaced by the job API
#[derive(Debug, Error)]
pub enum SyncError {
    /// The diff could not be computed; fatal to the job
    #[error("Diff failed: {0}")]
    Diff(#[from] DiffError),

    /// A transfer failed but may be retried
    #[error("Transient transfer failure on attempt {attempt}: {source}")]
    TransientTransfer {
        attempt: u32,
        #[source]
        source: TransferError,
    },

    /// A transfer failed for good
    #[error("Transfer failed after {attempts} attempt(s): {source}")]
    PermanentTransfer {
        attempts: u32,
        #[source]
        source: TransferError,
    },

    /// No job with this id is known
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The job repository failed
    #[error("Repository error: {0}")]
    Repository(#[source] anyhow::Error),
}
