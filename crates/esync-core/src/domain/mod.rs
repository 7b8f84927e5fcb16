//! Domain entities and business logic
//!
//! This module contains the core domain types for esync:
//! - Newtypes for job identifiers and validated remote paths
//! - File records as materialized from provider listings
//! - Sync operations produced by the diff engine
//! - Transfer tasks and their per-file outcomes
//! - Upload session handles
//! - The sync job aggregate and its lifecycle

pub mod errors;
pub mod file_record;
pub mod job;
pub mod newtypes;
pub mod operation;
pub mod task;
pub mod upload;

// Re-export commonly used types
pub use errors::DomainError;
pub use file_record::{Checksum, FileRecord};
pub use job::{JobStatus, SyncJob, SyncOptions};
pub use newtypes::*;
pub use operation::{OperationKind, SyncOperation};
pub use task::{OutcomeStatus, ResumePoint, TaskOutcome, TaskStatus, TransferTask};
pub use upload::{UploadRequest, UploadSession};
