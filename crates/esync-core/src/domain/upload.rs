//! Upload session value types shared by the executor and the store adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RemotePath;

/// Parameters for opening a resumable upload on a destination store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Destination path; missing parent folders are created implicitly
    pub path: RemotePath,
    /// Exact number of bytes that will be uploaded
    pub total_size: u64,
    /// Modification time to stamp on the uploaded file, when supported
    pub last_modified: Option<DateTime<Utc>>,
}

/// Handle to an open upload session on a destination store
///
/// `handle` is opaque to the engine: a Graph upload URL, an Egnyte local
/// session key, or a memory-store token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub handle: String,
    pub path: RemotePath,
    pub total_size: u64,
    /// When the provider will discard the session, if it says so
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    /// Returns true if the session is known to have expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}
