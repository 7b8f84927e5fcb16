//! SyncOperation domain entity
//!
//! Operations are produced by the diff engine and consumed exactly once by
//! the transfer scheduler. They are immutable.

use serde::{Deserialize, Serialize};

use super::file_record::FileRecord;
use super::newtypes::RemotePath;

/// Kind of change needed to converge one destination path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Skip,
}

impl OperationKind {
    /// Stable lowercase name, also used as the persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Skip => "skip",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned change, tagged with its source record (absent for deletes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOperation {
    /// Destination has no file at this path
    Create {
        source: FileRecord,
        destination: RemotePath,
    },
    /// Destination has a file whose content differs
    Update {
        source: FileRecord,
        destination: RemotePath,
    },
    /// Destination-only file, planned only when deletion is opted into
    Delete { destination: RemotePath },
    /// Destination already matches the source
    Skip {
        source: FileRecord,
        destination: RemotePath,
    },
}

impl SyncOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            SyncOperation::Create { .. } => OperationKind::Create,
            SyncOperation::Update { .. } => OperationKind::Update,
            SyncOperation::Delete { .. } => OperationKind::Delete,
            SyncOperation::Skip { .. } => OperationKind::Skip,
        }
    }

    /// Path in the destination store this operation converges
    pub fn destination(&self) -> &RemotePath {
        match self {
            SyncOperation::Create { destination, .. }
            | SyncOperation::Update { destination, .. }
            | SyncOperation::Delete { destination }
            | SyncOperation::Skip { destination, .. } => destination,
        }
    }

    /// Source record, if the operation has one
    pub fn source(&self) -> Option<&FileRecord> {
        match self {
            SyncOperation::Create { source, .. }
            | SyncOperation::Update { source, .. }
            | SyncOperation::Skip { source, .. } => Some(source),
            SyncOperation::Delete { .. } => None,
        }
    }

    /// Returns true for operations that move bytes (create or update)
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            SyncOperation::Create { .. } | SyncOperation::Update { .. }
        )
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.destination())
    }
}
