//! Upload operations for a Graph drive
//!
//! - [`create_upload_session`] - Opens a resumable session (conflict behaviour `replace`)
//! - [`upload_chunk`] - Sends one `Content-Range` chunk to the session URL
//! - [`abort_session`] - Discards a session
//! - [`upload_empty`] - Zero-byte files, which upload sessions do not accept
//!
//! ## Microsoft Graph API References
//!
//! - [Upload small files](https://learn.microsoft.com/en-us/graph/api/driveitem-put-content)
//! - [Upload large files](https://learn.microsoft.com/en-us/graph/api/driveitem-createuploadsession)

use chrono::{DateTime, Utc};
use esync_core::domain::UploadRequest;
use esync_core::ports::StoreError;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::client::{self, GraphClient};
use crate::items::DriveItem;

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateSessionBody {
    item: SessionItem,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionItem {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    conflict_behavior: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_system_info: Option<FileSystemInfoBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSystemInfoBody {
    last_modified_date_time: DateTime<Utc>,
}

/// Response to `createUploadSession`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    /// Pre-authenticated URL the chunks are sent to
    pub upload_url: String,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
}

/// Body of a 202 chunk response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkAccepted {
    #[serde(default)]
    next_expected_ranges: Vec<String>,
}

/// What the session did with a chunk
#[derive(Debug)]
pub enum ChunkResult {
    /// More bytes expected, starting at `next_offset`
    Accepted { next_offset: u64 },
    /// The last byte arrived and the file was committed
    Completed(Box<DriveItem>),
}

// ============================================================================
// Operations
// ============================================================================

/// Opens an upload session for `request.path`, replacing any existing file
pub async fn create_upload_session(
    client: &GraphClient,
    request: &UploadRequest,
) -> Result<UploadSessionResponse, StoreError> {
    let url = client.item_url(&request.path, Some("createUploadSession"))?;
    let body = CreateSessionBody {
        item: SessionItem {
            conflict_behavior: "replace",
            file_system_info: request
                .last_modified
                .map(|last_modified_date_time| FileSystemInfoBody {
                    last_modified_date_time,
                }),
        },
    };

    let response = client
        .send("create upload session", || {
            client.request(Method::POST, url.clone()).json(&body)
        })
        .await?;
    let session: UploadSessionResponse = client::json(response).await?;
    debug!(path = %request.path, expires = ?session.expiration_date_time, "Upload session created");
    Ok(session)
}

/// `Content-Range` value for `len` bytes at `offset` of a `total`-byte file
pub fn content_range(offset: u64, len: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", offset, offset + len - 1, total)
}

/// Uploads one chunk to a session URL
///
/// Upload URLs are pre-authenticated, so no bearer token is sent. A 404
/// means the session expired or was discarded. Throttling is not retried
/// here; the chunk goes back to the scheduler.
pub async fn upload_chunk(
    client: &GraphClient,
    upload_url: &str,
    offset: u64,
    bytes: Vec<u8>,
    total: u64,
) -> Result<ChunkResult, StoreError> {
    let len = bytes.len() as u64;
    if len == 0 {
        return Err(StoreError::Rejected {
            status: 416,
            message: "Empty chunk".to_string(),
        });
    }
    let range = content_range(offset, len, total);
    debug!(content_range = %range, "Uploading chunk");

    let response = client
        .http()
        .put(upload_url)
        .header(CONTENT_LENGTH, len)
        .header(CONTENT_RANGE, &range)
        .body(bytes)
        .send()
        .await
        .map_err(client::transport_error)?;

    match response.status() {
        StatusCode::ACCEPTED => {
            let accepted: ChunkAccepted = client::json(response).await?;
            let next_offset = accepted
                .next_expected_ranges
                .first()
                .and_then(|r| parse_range_start(r))
                .unwrap_or(offset + len);
            Ok(ChunkResult::Accepted { next_offset })
        }
        StatusCode::OK | StatusCode::CREATED => {
            debug!(content_range = %range, "Upload session completed");
            let item: DriveItem = client::json(response).await?;
            Ok(ChunkResult::Completed(Box::new(item)))
        }
        StatusCode::NOT_FOUND => Err(StoreError::SessionExpired(format!(
            "Upload session not found at {range}"
        ))),
        status if status.is_success() => Err(StoreError::InvalidResponse(format!(
            "Unexpected chunk upload status {status}"
        ))),
        _ => Err(client::status_error(response).await),
    }
}

/// Start of a `nextExpectedRanges` entry such as `"26-"` or `"26-99"`
fn parse_range_start(range: &str) -> Option<u64> {
    range.split('-').next()?.trim().parse().ok()
}

/// Deletes an upload session; a session that is already gone counts as deleted
pub async fn abort_session(client: &GraphClient, upload_url: &str) -> Result<(), StoreError> {
    let response = client
        .http()
        .delete(upload_url)
        .send()
        .await
        .map_err(client::transport_error)?;

    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_FOUND {
        debug!(%status, "Upload session discarded");
        return Ok(());
    }
    Err(client::status_error(response).await)
}

/// Creates a zero-byte file with a simple PUT, then stamps its modification time
pub async fn upload_empty(
    client: &GraphClient,
    request: &UploadRequest,
) -> Result<DriveItem, StoreError> {
    let url = client.item_url(&request.path, Some("content"))?;
    let response = client
        .send("upload empty file", || {
            client
                .request(Method::PUT, url.clone())
                .header(CONTENT_LENGTH, 0)
                .body(Vec::new())
        })
        .await?;
    let item: DriveItem = client::json(response).await?;

    let Some(modified) = request.last_modified else {
        return Ok(item);
    };
    let url = client.item_url(&request.path, None)?;
    let body = json!({ "fileSystemInfo": { "lastModifiedDateTime": modified } });
    let response = client
        .send("stamp modification time", || {
            client.request(Method::PATCH, url.clone()).json(&body)
        })
        .await?;
    client::json(response).await
}
