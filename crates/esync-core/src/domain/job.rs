//! SyncJob domain entity
//!
//! The `SyncJob` is the aggregate root of one submitted sync request and the
//! only externally visible handle for progress polling. It is mutated solely
//! by the job tracker and becomes immutable once its status is terminal.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{JobId, RemotePath};
use super::task::{OutcomeStatus, TaskOutcome};

/// Lifecycle status of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, no task admitted yet
    Queued,
    /// At least one task has been admitted
    Running,
    /// Every operation succeeded or was skipped
    Completed,
    /// Ran to the end, but some files failed permanently
    CompletedWithErrors,
    /// The engine could not proceed at all (e.g. a side could not be listed)
    Failed,
    /// Stopped by the caller
    Cancelled,
}

impl JobStatus {
    /// Returns true once the job can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown job status: {other}"
            ))),
        }
    }
}

/// Caller-supplied options for one sync request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Delete destination files that have no source counterpart
    #[serde(default)]
    pub delete_extraneous: bool,
    /// Worker pool size for this job; the engine default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<usize>,
}

/// Aggregate record of one sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    id: JobId,
    source_root: RemotePath,
    destination_root: RemotePath,
    options: SyncOptions,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    status: JobStatus,
    total_operations: usize,
    completed_operations: usize,
    outcomes: Vec<TaskOutcome>,
    error: Option<String>,
}

impl SyncJob {
    /// Creates a queued job with a fresh id
    pub fn new(source_root: RemotePath, destination_root: RemotePath, options: SyncOptions) -> Self {
        Self::with_id(JobId::new(), source_root, destination_root, options)
    }

    /// Creates a queued job with a specific id
    pub fn with_id(
        id: JobId,
        source_root: RemotePath,
        destination_root: RemotePath,
        options: SyncOptions,
    ) -> Self {
        Self {
            id,
            source_root,
            destination_root,
            options,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: JobStatus::Queued,
            total_operations: 0,
            completed_operations: 0,
            outcomes: Vec::new(),
            error: None,
        }
    }

    // --- Getters ---

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn source_root(&self) -> &RemotePath {
        &self.source_root
    }

    pub fn destination_root(&self) -> &RemotePath {
        &self.destination_root
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn total_operations(&self) -> usize {
        self.total_operations
    }

    pub fn completed_operations(&self) -> usize {
        self.completed_operations
    }

    /// Per-file outcomes in the order they were reported
    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// Job-level failure reason (only set when status is `Failed`)
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(OutcomeStatus::Succeeded)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    pub fn failed_count(&self) -> usize {
        self.count(OutcomeStatus::PermanentlyFailed)
    }

    pub fn cancelled_count(&self) -> usize {
        self.count(OutcomeStatus::Cancelled)
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes_transferred).sum()
    }

    /// Calculates progress as a percentage (0.0 - 100.0)
    pub fn progress_percent(&self) -> f64 {
        if self.total_operations == 0 {
            return if self.is_terminal() { 100.0 } else { 0.0 };
        }
        (self.completed_operations as f64 / self.total_operations as f64) * 100.0
    }

    /// Wall-clock time from start to finish (or until now if still running)
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }

    // --- State transitions ---

    fn ensure_not_terminal(&self, to: JobStatus) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Sets the planned operation count; a job with nothing to do completes at once
    pub fn set_total_operations(&mut self, total: usize) -> Result<(), DomainError> {
        if self.status != JobStatus::Queued {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: "planned".to_string(),
            });
        }
        self.total_operations = total;
        if total == 0 {
            self.started_at = Some(Utc::now());
            self.finish(JobStatus::Completed);
        }
        Ok(())
    }

    /// Queued -> Running; no-op if already running
    pub fn start(&mut self) -> Result<(), DomainError> {
        match self.status {
            JobStatus::Running => Ok(()),
            JobStatus::Queued => {
                self.status = JobStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: JobStatus::Running.to_string(),
            }),
        }
    }

    /// Appends one terminal file outcome, resolving the job when all are in
    pub fn record_outcome(&mut self, outcome: TaskOutcome) -> Result<(), DomainError> {
        self.ensure_not_terminal(JobStatus::Running)?;
        if self.completed_operations >= self.total_operations {
            return Err(DomainError::ValidationFailed(format!(
                "Outcome for {} exceeds planned total of {}",
                outcome.path, self.total_operations
            )));
        }
        self.start()?;

        self.outcomes.push(outcome);
        self.completed_operations += 1;

        if self.completed_operations == self.total_operations {
            let status = if self.cancelled_count() > 0 {
                JobStatus::Cancelled
            } else if self.failed_count() > 0 {
                JobStatus::CompletedWithErrors
            } else {
                JobStatus::Completed
            };
            self.finish(status);
        }
        Ok(())
    }

    /// Marks the job as unable to proceed
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_not_terminal(JobStatus::Failed)?;
        self.error = Some(reason.into());
        self.finish(JobStatus::Failed);
        Ok(())
    }

    /// Cancels a job whose operations were never planned
    pub fn cancel_unplanned(&mut self) -> Result<(), DomainError> {
        self.ensure_not_terminal(JobStatus::Cancelled)?;
        if self.total_operations > 0 {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: JobStatus::Cancelled.to_string(),
            });
        }
        self.finish(JobStatus::Cancelled);
        Ok(())
    }
}
