//! TransferTask and TaskOutcome domain entities
//!
//! A `TransferTask` wraps one `SyncOperation` with the mutable execution state
//! owned by the scheduler/executor pair. Once a task reaches a terminal state
//! it is converted into an immutable `TaskOutcome`, which is the only form
//! the job tracker ever sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RemotePath;
use super::operation::{OperationKind, SyncOperation};
use super::upload::UploadSession;

/// Execution status of a live transfer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker (or for its retry delay to elapse)
    Pending,
    /// An attempt is executing
    InFlight,
    /// Finished successfully
    Succeeded,
    /// Last attempt failed; the task may still be retried
    Failed,
    /// Failed for good, no further attempts
    PermanentlyFailed,
}

impl TaskStatus {
    /// Returns true if no further attempts will be made
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::PermanentlyFailed)
    }
}

/// Last acknowledged position of a resumable upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub session: UploadSession,
    /// Offset of the next byte the destination expects
    pub cursor: u64,
}

/// A sync operation plus its execution state
#[derive(Debug, Clone)]
pub struct TransferTask {
    sequence: usize,
    operation: SyncOperation,
    attempt: u32,
    status: TaskStatus,
    last_error: Option<String>,
    resume: Option<ResumePoint>,
}

impl TransferTask {
    /// Creates a pending task; `sequence` is the admission order within the job
    pub fn new(sequence: usize, operation: SyncOperation) -> Self {
        Self {
            sequence,
            operation,
            attempt: 0,
            status: TaskStatus::Pending,
            last_error: None,
            resume: None,
        }
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn operation(&self) -> &SyncOperation {
        &self.operation
    }

    /// Number of attempts started so far (0 before the first attempt)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn resume_point(&self) -> Option<&ResumePoint> {
        self.resume.as_ref()
    }

    /// Records the last acknowledged upload position
    pub fn set_resume_point(&mut self, resume: Option<ResumePoint>) {
        self.resume = resume;
    }

    /// Removes and returns the resume position
    pub fn take_resume_point(&mut self) -> Option<ResumePoint> {
        self.resume.take()
    }

    /// Starts a new attempt
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.status = TaskStatus::InFlight;
    }

    pub fn mark_succeeded(&mut self) {
        self.status = TaskStatus::Succeeded;
        self.last_error = None;
        self.resume = None;
    }

    /// Records a failed attempt that is eligible for retry
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(reason.into());
    }

    pub fn mark_permanently_failed(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::PermanentlyFailed;
        self.last_error = Some(reason.into());
        self.resume = None;
    }
}

/// Terminal result of one file in a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Skipped,
    PermanentlyFailed,
    Cancelled,
}

impl OutcomeStatus {
    /// Stable lowercase name, also used as the persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::PermanentlyFailed => "permanently_failed",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of how one operation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub sequence: usize,
    pub path: RemotePath,
    pub kind: OperationKind,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub bytes_transferred: u64,
    /// Failure reason or cancellation note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TaskOutcome {
    fn from_task(task: &TransferTask, status: OutcomeStatus) -> Self {
        Self {
            sequence: task.sequence,
            path: task.operation.destination().clone(),
            kind: task.operation.kind(),
            status,
            attempts: task.attempt,
            bytes_transferred: 0,
            message: None,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(task: &TransferTask, bytes_transferred: u64) -> Self {
        Self {
            bytes_transferred,
            ..Self::from_task(task, OutcomeStatus::Succeeded)
        }
    }

    pub fn skipped(task: &TransferTask) -> Self {
        Self::from_task(task, OutcomeStatus::Skipped)
    }

    pub fn permanently_failed(task: &TransferTask, reason: impl Into<String>) -> Self {
        Self {
            message: Some(reason.into()),
            ..Self::from_task(task, OutcomeStatus::PermanentlyFailed)
        }
    }

    pub fn cancelled(task: &TransferTask) -> Self {
        Self {
            message: Some("cancelled before completion".to_string()),
            ..Self::from_task(task, OutcomeStatus::Cancelled)
        }
    }

    /// Returns true if this file ended in a permanent failure
    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::PermanentlyFailed
    }
}
