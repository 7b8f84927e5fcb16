//! File store port (driven/secondary port)
//!
//! This module defines the provider-neutral capability interface the sync
//! engine uses to talk to a remote file store. Egnyte and SharePoint each
//! implement it once; an in-memory implementation backs mock mode and tests.
//!
//! ## Design Notes
//!
//! - Unlike the repository port, errors here are a typed [`StoreError`]
//!   rather than `anyhow::Error`: the engine's retry policy must tell a
//!   throttled request from a revoked permission.
//! - Provider payloads are validated into [`FileRecord`] at this boundary;
//!   nothing upstream ever sees raw JSON.
//! - Listing is a lazy stream so paginated providers fetch pages on demand.

use std::time::Duration;

use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::domain::{FileRecord, RemotePath, UploadRequest, UploadSession};

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a file store adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The item does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials missing, expired or revoked (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted (HTTP 403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Provider throttling (HTTP 429 or 503 with Retry-After)
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Delay requested by the provider, if any
        retry_after: Option<Duration>,
    },

    /// Provider-side failure (HTTP 5xx)
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Request refused for a reason retrying will not fix (other HTTP 4xx)
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The upload session is gone; the upload must restart from byte zero
    #[error("Upload session expired: {0}")]
    SessionExpired(String),

    /// The request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with something we could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// Maps an HTTP error status to the matching variant
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            401 => StoreError::Unauthorized(message),
            403 => StoreError::Forbidden(message),
            404 => StoreError::NotFound(message),
            408 => StoreError::Timeout(message),
            429 => StoreError::RateLimited { retry_after },
            503 if retry_after.is_some() => StoreError::RateLimited { retry_after },
            500..=599 => StoreError::Server { status, message },
            _ => StoreError::Rejected { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Returns true for failures that may succeed when retried later
    ///
    /// `NotFound` is reported as not transient here; callers that expect
    /// eventual consistency decide for themselves.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::RateLimited { .. }
                | StoreError::Server { .. }
                | StoreError::SessionExpired(_)
                | StoreError::Timeout(_)
                | StoreError::Network(_)
        )
    }

    /// Delay requested by the provider, if this is a throttling error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ============================================================================
// Value types
// ============================================================================

/// Half-open byte range `[start, end)`; `end: None` reads to end of file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range covering `[start, end)`
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Range from `start` to the end of the file
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Number of bytes covered, if bounded
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// HTTP `Range` header value (inclusive end, as RFC 9110 requires)
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) if end > self.start => format!("bytes={}-{}", self.start, end - 1),
            _ => format!("bytes={}-", self.start),
        }
    }
}

/// Result of an idempotent delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The item existed and was removed
    Deleted,
    /// The item was already absent
    NotFound,
}

/// Stream of content chunks from a ranged read
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StoreError>>;

/// Lazy listing of one folder's direct children
pub type RecordStream<'a> = BoxStream<'a, Result<FileRecord, StoreError>>;

/// Receives throttling an adapter waited out on its own
///
/// Adapters that retry a throttled request in place report every wait here,
/// so the caller's rate limiting slows down with them. Throttling returned
/// as [`StoreError::RateLimited`] is not reported.
pub trait ThrottleObserver: Send + Sync + std::fmt::Debug {
    fn on_throttled(&self, retry_after: Option<Duration>);
}

// ============================================================================
// IFileStore trait
// ============================================================================

/// Port trait for a remote file store
///
/// ## Implementation Notes
///
/// - `list` yields the direct children of a folder, folders included. It
///   yields a single `NotFound` error if the folder does not exist.
/// - `upload_chunk` must only be called with `offset` equal to the cursor
///   returned by the previous call (or 0). It returns the new cursor, i.e.
///   the offset of the next byte the store expects.
/// - Implementations create missing parent folders implicitly on upload.
/// - `delete` reports `DeleteOutcome::NotFound` instead of an error when the
///   item is already gone.
#[async_trait::async_trait]
pub trait IFileStore: Send + Sync {
    /// Short provider name used in logs (e.g. "egnyte")
    fn name(&self) -> &str;

    /// Lists the direct children of `path`, fetching pages lazily
    fn list<'a>(&'a self, path: &'a RemotePath) -> RecordStream<'a>;

    /// Fetches metadata for a single item
    async fn get(&self, path: &RemotePath) -> Result<FileRecord, StoreError>;

    /// Opens a bounded read stream over `range` of a file's content
    async fn open_read(&self, path: &RemotePath, range: ByteRange) -> Result<ByteStream, StoreError>;

    /// Opens a resumable upload session
    async fn begin_upload(&self, request: &UploadRequest) -> Result<UploadSession, StoreError>;

    /// Uploads one chunk at `offset`, returning the new cursor
    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        bytes: Vec<u8>,
    ) -> Result<u64, StoreError>;

    /// Finalizes an upload and returns the stored file's metadata
    async fn complete_upload(&self, session: &UploadSession) -> Result<FileRecord, StoreError>;

    /// Discards a partially uploaded session
    async fn abort_upload(&self, session: &UploadSession) -> Result<(), StoreError>;

    /// Deletes a file
    async fn delete(&self, path: &RemotePath) -> Result<DeleteOutcome, StoreError>;
}
