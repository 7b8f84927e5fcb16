//! Job state tracker
//!
//! Owns one [`SyncJob`] and is its only writer. Every change produces a new
//! `Arc<SyncJob>` snapshot on a `watch` channel; readers get a cheap clone of
//! the latest snapshot and never observe a half-applied update. Workers do
//! not touch the job directly: they send [`TaskEvent`]s, which the tracker
//! applies in arrival order.

use std::sync::Arc;

use esync_core::domain::{DomainError, SyncJob};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::scheduler::TaskEvent;

/// Single writer for one job's state
#[derive(Debug)]
pub struct JobTracker {
    tx: watch::Sender<Arc<SyncJob>>,
}

impl JobTracker {
    pub fn new(job: SyncJob) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(job));
        Self { tx }
    }

    /// Latest consistent snapshot
    pub fn snapshot(&self) -> Arc<SyncJob> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<Arc<SyncJob>> {
        self.tx.subscribe()
    }

    pub fn is_terminal(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    /// Applies `change` copy-on-write; subscribers are only notified if it succeeds
    fn update<F>(&self, change: F) -> Result<(), DomainError>
    where
        F: FnOnce(&mut SyncJob) -> Result<(), DomainError>,
    {
        let mut result = Ok(());
        self.tx.send_if_modified(|current| {
            let mut next = SyncJob::clone(current);
            match change(&mut next) {
                Ok(()) => {
                    *current = Arc::new(next);
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        result
    }

    /// Records the planned operation count
    pub fn set_total(&self, total: usize) -> Result<(), DomainError> {
        self.update(|job| job.set_total_operations(total))?;
        if total == 0 {
            info!(job_id = %self.snapshot().id(), "Nothing to do, job completed");
        }
        Ok(())
    }

    /// Applies one scheduler event
    pub fn apply(&self, event: TaskEvent) {
        let result = match event {
            TaskEvent::Admitted { .. } => self.update(|job| job.start()),
            TaskEvent::Finished(outcome) => self.update(|job| job.record_outcome(outcome)),
        };
        if let Err(e) = result {
            warn!(error = %e, "Dropped task event");
            return;
        }

        let job = self.snapshot();
        if job.is_terminal() {
            info!(
                job_id = %job.id(),
                status = %job.status(),
                succeeded = job.succeeded_count(),
                skipped = job.skipped_count(),
                failed = job.failed_count(),
                cancelled = job.cancelled_count(),
                bytes = job.bytes_transferred(),
                "Job finished"
            );
        }
    }

    /// Applies events until the scheduler closes the channel
    pub async fn consume(&self, mut events: mpsc::UnboundedReceiver<TaskEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
    }

    /// Marks the job failed (e.g. the diff could not be computed)
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), DomainError> {
        let reason = reason.into();
        self.update(|job| job.fail(reason.clone()))?;
        warn!(job_id = %self.snapshot().id(), %reason, "Job failed");
        Ok(())
    }

    /// Cancels a job before its operations were planned
    pub fn cancel_unplanned(&self) -> Result<(), DomainError> {
        self.update(|job| job.cancel_unplanned())?;
        info!(job_id = %self.snapshot().id(), "Job cancelled before planning");
        Ok(())
    }

    /// Waits until the job reaches a terminal status
    pub async fn wait_terminal(&self) -> Arc<SyncJob> {
        let mut rx = self.subscribe();
        let job = match rx.wait_for(|job| job.is_terminal()).await {
            Ok(job) => job.clone(),
            Err(_) => self.snapshot(),
        };
        job
    }
}
