//! Chunked transfer executor
//!
//! Executes a single [`TransferTask`] against the source and destination
//! stores. Creates and updates stream the source content through a resumable
//! upload session in `chunk_size` pieces; every acknowledged chunk advances
//! the task's resume point so a retry continues where the last attempt
//! stopped. Deletes are idempotent.
//!
//! Cancellation is observed between chunks and while waiting for a rate
//! limit token, never in the middle of a request. A cancelled upload aborts
//! its session before returning, so no partial session is left behind.

use std::sync::Arc;

use chrono::Utc;
use esync_core::domain::{
    Checksum, FileRecord, RemotePath, ResumePoint, SyncOperation, TransferTask, UploadRequest,
    UploadSession,
};
use esync_core::ports::{ByteRange, DeleteOutcome, IFileStore, StoreError};
use futures_util::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::rate_limit::{Direction, TransferRateLimiter};

/// Failure of a single transfer attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Reading from the source store failed
    #[error("Source: {0}")]
    Source(StoreError),

    /// Writing to the destination store failed
    #[error("Destination: {0}")]
    Destination(StoreError),

    /// The destination reports different content than the source
    #[error("Checksum mismatch: expected {expected}, destination has {actual}")]
    ChecksumMismatch { expected: Checksum, actual: Checksum },

    /// Byte count differs from what the source listed
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Cancellation observed at a chunk boundary
    #[error("Cancelled")]
    Cancelled,
}

/// Result of a successful attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Size of the transferred file (0 for deletes and skips)
    pub bytes_transferred: u64,
    /// Offset this attempt resumed from, if it did not start at zero
    pub resumed_from: Option<u64>,
    /// Destination metadata after a completed upload
    pub record: Option<FileRecord>,
}

/// Runs transfer tasks against a pair of stores
pub struct TransferExecutor {
    source: Arc<dyn IFileStore>,
    destination: Arc<dyn IFileStore>,
    limiter: Arc<TransferRateLimiter>,
    chunk_size: usize,
}

impl TransferExecutor {
    pub fn new(
        source: Arc<dyn IFileStore>,
        destination: Arc<dyn IFileStore>,
        limiter: Arc<TransferRateLimiter>,
        chunk_size: u64,
    ) -> Self {
        Self {
            source,
            destination,
            limiter,
            chunk_size: usize::try_from(chunk_size).unwrap_or(usize::MAX).max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Executes one attempt of `task`.
    ///
    /// The task's resume point is updated after every acknowledged chunk and
    /// cleared once the upload completes, fails for good or is cancelled.
    #[instrument(
        skip_all,
        fields(path = %task.operation().destination(), kind = %task.operation().kind(), attempt = task.attempt())
    )]
    pub async fn execute(
        &self,
        task: &mut TransferTask,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, TransferError> {
        match task.operation().clone() {
            SyncOperation::Create {
                source,
                destination,
            }
            | SyncOperation::Update {
                source,
                destination,
            } => self.transfer(task, &source, &destination, cancel).await,
            SyncOperation::Delete { destination } => self.delete(task, &destination, cancel).await,
            SyncOperation::Skip { .. } => Ok(TransferReport::default()),
        }
    }

    /// Aborts the upload session a task still holds, if any.
    ///
    /// Used when a task waiting for a retry is cancelled. Abort failures are
    /// logged and otherwise ignored; the provider expires the session anyway.
    pub async fn abandon(&self, task: &mut TransferTask) {
        if let Some(point) = task.take_resume_point() {
            self.abort_quietly(&point.session).await;
        }
    }

    async fn transfer(
        &self,
        task: &mut TransferTask,
        source: &FileRecord,
        destination: &RemotePath,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, TransferError> {
        let mut resume = task.take_resume_point();
        if let Some(point) = &resume {
            if point.session.is_expired_at(Utc::now()) || point.session.total_size != source.size_bytes {
                info!(cursor = point.cursor, "Stored upload session is stale, restarting from zero");
                self.abort_quietly(&point.session).await;
                resume = None;
            }
        }

        let Some(point) = resume else {
            let session = self.open_session(task, source, destination, cancel).await?;
            return self.send_from(task, source, session, 0, cancel).await;
        };

        info!(cursor = point.cursor, total = source.size_bytes, "Resuming upload");
        match self
            .send_from(task, source, point.session, point.cursor, cancel)
            .await
        {
            Err(TransferError::Destination(StoreError::SessionExpired(reason))) => {
                warn!(%reason, "Upload session expired while resuming, restarting from zero");
                let session = self.open_session(task, source, destination, cancel).await?;
                self.send_from(task, source, session, 0, cancel).await
            }
            other => other,
        }
    }

    async fn open_session(
        &self,
        task: &mut TransferTask,
        source: &FileRecord,
        destination: &RemotePath,
        cancel: &CancellationToken,
    ) -> Result<UploadSession, TransferError> {
        let request = UploadRequest {
            path: destination.clone(),
            total_size: source.size_bytes,
            last_modified: Some(source.last_modified),
        };
        self.acquire_or_cancel(task, Direction::DestinationWrite, cancel)
            .await?;
        let session = self
            .destination
            .begin_upload(&request)
            .await
            .map_err(|e| self.destination_failure(e))?;
        self.limiter.on_success(Direction::DestinationWrite);
        debug!(handle = %session.handle, "Upload session opened");
        Ok(session)
    }

    /// Streams `[cursor, total)` of the source into `session`, then completes it
    async fn send_from(
        &self,
        task: &mut TransferTask,
        source: &FileRecord,
        session: UploadSession,
        start: u64,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, TransferError> {
        let total = session.total_size;
        let mut cursor = start;
        task.set_resume_point(Some(ResumePoint {
            session: session.clone(),
            cursor,
        }));

        if cursor < total {
            self.acquire_or_cancel(task, Direction::SourceRead, cancel)
                .await?;
            let mut stream = self
                .source
                .open_read(&source.path, ByteRange::new(cursor, total))
                .await
                .map_err(|e| self.source_failure(e))?;
            self.limiter.on_success(Direction::SourceRead);

            let mut buffer: Vec<u8> = Vec::new();
            let mut exhausted = false;

            while cursor < total {
                if cancel.is_cancelled() {
                    info!(cursor, total, "Cancelled at chunk boundary");
                    self.abandon(task).await;
                    return Err(TransferError::Cancelled);
                }

                while buffer.len() < self.chunk_size && !exhausted {
                    match stream.next().await {
                        Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                        Some(Err(e)) => return Err(self.source_failure(e)),
                        None => exhausted = true,
                    }
                }

                let remaining = usize::try_from(total - cursor).unwrap_or(usize::MAX);
                let take = buffer.len().min(self.chunk_size).min(remaining);
                if take < self.chunk_size.min(remaining) {
                    // Source ended early: it changed since it was listed
                    return Err(TransferError::SizeMismatch {
                        expected: total,
                        actual: cursor + buffer.len() as u64,
                    });
                }

                let rest = buffer.split_off(take);
                let chunk = std::mem::replace(&mut buffer, rest);

                self.acquire_or_cancel(task, Direction::DestinationWrite, cancel)
                    .await?;
                let acknowledged = self
                    .destination
                    .upload_chunk(&session, cursor, chunk)
                    .await
                    .map_err(|e| self.destination_failure(e))?;
                self.limiter.on_success(Direction::DestinationWrite);

                if acknowledged != cursor + take as u64 {
                    return Err(TransferError::Destination(StoreError::InvalidResponse(format!(
                        "expected cursor {} after chunk, store reported {}",
                        cursor + take as u64,
                        acknowledged
                    ))));
                }
                cursor = acknowledged;
                task.set_resume_point(Some(ResumePoint {
                    session: session.clone(),
                    cursor,
                }));
                debug!(cursor, total, "Chunk acknowledged");
            }

            if !buffer.is_empty() {
                return Err(TransferError::SizeMismatch {
                    expected: total,
                    actual: total + buffer.len() as u64,
                });
            }
        }

        self.acquire_or_cancel(task, Direction::DestinationWrite, cancel)
            .await?;
        let record = self
            .destination
            .complete_upload(&session)
            .await
            .map_err(|e| self.destination_failure(e))?;
        self.limiter.on_success(Direction::DestinationWrite);
        task.set_resume_point(None);

        verify(source, &record)?;

        info!(bytes = total, "Upload completed");
        Ok(TransferReport {
            bytes_transferred: total,
            resumed_from: (start > 0).then_some(start),
            record: Some(record),
        })
    }

    async fn delete(
        &self,
        task: &mut TransferTask,
        path: &RemotePath,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, TransferError> {
        self.acquire_or_cancel(task, Direction::DestinationWrite, cancel)
            .await?;
        match self.destination.delete(path).await {
            Ok(DeleteOutcome::Deleted) => {
                self.limiter.on_success(Direction::DestinationWrite);
                info!("Deleted");
            }
            Ok(DeleteOutcome::NotFound) | Err(StoreError::NotFound(_)) => {
                self.limiter.on_success(Direction::DestinationWrite);
                debug!("Already absent");
            }
            Err(e) => return Err(self.destination_failure(e)),
        }
        Ok(TransferReport::default())
    }

    /// Waits for a token in `direction` unless the job is cancelled first.
    ///
    /// A cancelled task releases its upload session before this returns
    /// `TransferError::Cancelled`, and no request is started after the token
    /// is granted to an already cancelled job.
    async fn acquire_or_cancel(
        &self,
        task: &mut TransferTask,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let granted = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.limiter.acquire(direction) => true,
        };
        if granted && !cancel.is_cancelled() {
            return Ok(());
        }
        info!(?direction, "Cancelled while waiting for a rate limit token");
        self.abandon(task).await;
        Err(TransferError::Cancelled)
    }

    // Cleanup never waits on the bucket
    async fn abort_quietly(&self, session: &UploadSession) {
        if let Err(e) = self.destination.abort_upload(session).await {
            warn!(handle = %session.handle, error = %e, "Failed to abort upload session");
        }
    }

    fn source_failure(&self, err: StoreError) -> TransferError {
        if let StoreError::RateLimited { retry_after } = &err {
            self.limiter.on_throttle(Direction::SourceRead, *retry_after);
        }
        TransferError::Source(err)
    }

    fn destination_failure(&self, err: StoreError) -> TransferError {
        if let StoreError::RateLimited { retry_after } = &err {
            self.limiter.on_throttle(Direction::DestinationWrite, *retry_after);
        }
        TransferError::Destination(err)
    }
}

/// Checks the stored file against what the source listed
fn verify(source: &FileRecord, stored: &FileRecord) -> Result<(), TransferError> {
    if stored.size_bytes != source.size_bytes {
        return Err(TransferError::SizeMismatch {
            expected: source.size_bytes,
            actual: stored.size_bytes,
        });
    }
    if let Some((expected, actual)) = source.comparable_checksums(stored) {
        if expected.value != actual.value {
            return Err(TransferError::ChecksumMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }
    Ok(())
}
