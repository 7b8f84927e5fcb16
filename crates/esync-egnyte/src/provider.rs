//! Egnyte store
//!
//! [`EgnyteStore`] implements [`IFileStore`] over the Egnyte public API.
//!
//! Egnyte has no explicit "create upload session" call: the upload id comes
//! back on the response to the first chunk. `begin_upload` therefore only
//! registers a local session, and the id and chunk number are tracked here
//! until `complete_upload`. A handle this store does not know (for instance
//! from an earlier process) is reported as an expired session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use esync_core::config::EgnyteConfig;
use esync_core::domain::{FileRecord, RemotePath, UploadRequest, UploadSession};
use esync_core::ports::{
    ByteRange, ByteStream, DeleteOutcome, IFileStore, RecordStream, StoreError, ThrottleObserver,
};
use futures_util::{future, stream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED, RANGE};
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument};

use crate::client::{self, EgnyteClient, Endpoint};
use crate::model::{EntryMetadata, FolderListing};
use crate::EgnyteError;

const UPLOAD_ID_HEADER: &str = "X-Egnyte-Upload-Id";
const CHUNK_NUM_HEADER: &str = "X-Egnyte-Chunk-Num";
const LAST_CHUNK_HEADER: &str = "X-Egnyte-Last-Chunk";

const DEFAULT_PAGE_SIZE: u32 = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Progress of one chunked upload
#[derive(Debug)]
struct ChunkedUpload {
    request: UploadRequest,
    upload_id: Option<String>,
    /// 1-based number of the next chunk
    next_chunk: u32,
    cursor: u64,
}

/// [`IFileStore`] backed by an Egnyte domain
#[derive(Debug)]
pub struct EgnyteStore {
    client: EgnyteClient,
    page_size: u32,
    uploads: Mutex<HashMap<String, ChunkedUpload>>,
    next_handle: AtomicU64,
}

impl EgnyteStore {
    pub fn new(client: EgnyteClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
            uploads: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Builds a store from the `egnyte` store section of the config
    pub fn from_config(
        config: &EgnyteConfig,
        access_token: impl Into<String>,
    ) -> Result<Self, EgnyteError> {
        let client = match config.base_url.as_deref() {
            Some(base_url) => EgnyteClient::with_base_url(base_url, access_token)?,
            None => EgnyteClient::new(&config.domain, access_token)?,
        }
        .with_timeout(Duration::from_secs(config.timeout_secs))?;
        Ok(Self::new(client).with_page_size(config.page_size))
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Reports throttling the client waits out in place to `observer`
    pub fn with_throttle_observer(mut self, observer: Arc<dyn ThrottleObserver>) -> Self {
        self.client = self.client.with_throttle_observer(observer);
        self
    }

    /// Number of chunked uploads this store is tracking
    pub fn open_uploads(&self) -> usize {
        lock(&self.uploads).len()
    }

    async fn fetch_listing(
        &self,
        path: &RemotePath,
        offset: u64,
    ) -> Result<FolderListing, StoreError> {
        let mut url = self.client.url(Endpoint::Fs, path)?;
        url.query_pairs_mut()
            .append_pair("list_content", "true")
            .append_pair("offset", &offset.to_string())
            .append_pair("count", &self.page_size.to_string());
        let response = self
            .client
            .send("list folder", || self.client.request(Method::GET, url.clone()))
            .await?;
        client::json(response).await
    }

    /// Single-request upload, used for zero-byte files
    async fn upload_whole(&self, request: &UploadRequest) -> Result<(), StoreError> {
        let url = self.client.url(Endpoint::FsContent, &request.path)?;
        let last_modified = request.last_modified.map(|m| m.to_rfc2822());
        self.client
            .send("upload empty file", || {
                let builder = self
                    .client
                    .request(Method::POST, url.clone())
                    .header(CONTENT_LENGTH, 0)
                    .body(Vec::new());
                match &last_modified {
                    Some(value) => builder.header(LAST_MODIFIED, value.as_str()),
                    None => builder,
                }
            })
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IFileStore for EgnyteStore {
    fn name(&self) -> &str {
        "egnyte"
    }

    fn list<'a>(&'a self, path: &'a RemotePath) -> RecordStream<'a> {
        stream::try_unfold(Some(0u64), move |offset| async move {
            let Some(offset) = offset else {
                return Ok::<_, StoreError>(None);
            };

            let listing = self.fetch_listing(path, offset).await?;
            let fetched = listing.len() as u64;
            let next_offset = offset + fetched;
            let more = match listing.total_count {
                Some(total) => fetched > 0 && next_offset < total,
                None => fetched >= u64::from(self.page_size),
            };
            debug!(%path, offset, fetched, more, "Fetched folder page");

            let records = listing.into_records(path);
            Ok(Some((stream::iter(records), more.then_some(next_offset))))
        })
        .try_flatten()
        .boxed()
    }

    async fn get(&self, path: &RemotePath) -> Result<FileRecord, StoreError> {
        let url = self.client.url(Endpoint::Fs, path)?;
        let response = self
            .client
            .send("get metadata", || self.client.request(Method::GET, url.clone()))
            .await?;
        let metadata: EntryMetadata = client::json(response).await?;
        metadata.into_record(path.clone())
    }

    #[instrument(skip_all, fields(%path, range = %range.header_value()))]
    async fn open_read(&self, path: &RemotePath, range: ByteRange) -> Result<ByteStream, StoreError> {
        if range.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let url = self.client.url(Endpoint::FsContent, path)?;
        let response = self
            .client
            .send("download", || {
                self.client
                    .request(Method::GET, url.clone())
                    .header(RANGE, range.header_value())
            })
            .await?;

        if response.status() != StatusCode::PARTIAL_CONTENT && range.start > 0 {
            return Err(StoreError::InvalidResponse(format!(
                "Range not honoured for {path} (status {})",
                response.status()
            )));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(client::transport_error))
            .scan(range.len(), |remaining, chunk| {
                let item = match chunk {
                    Ok(mut bytes) => match remaining {
                        Some(0) => return future::ready(None),
                        Some(left) => {
                            let take = bytes.len().min(usize::try_from(*left).unwrap_or(usize::MAX));
                            bytes.truncate(take);
                            *left -= take as u64;
                            Ok(bytes)
                        }
                        None => Ok(bytes),
                    },
                    Err(e) => Err(e),
                };
                future::ready(Some(item))
            });
        Ok(body.boxed())
    }

    #[instrument(skip_all, fields(path = %request.path, size = request.total_size))]
    async fn begin_upload(&self, request: &UploadRequest) -> Result<UploadSession, StoreError> {
        let handle = format!(
            "egnyte-upload-{}",
            self.next_handle.fetch_add(1, Ordering::Relaxed)
        );
        lock(&self.uploads).insert(
            handle.clone(),
            ChunkedUpload {
                request: request.clone(),
                upload_id: None,
                next_chunk: 1,
                cursor: 0,
            },
        );
        debug!(%handle, "Registered chunked upload");
        Ok(UploadSession {
            handle,
            path: request.path.clone(),
            total_size: request.total_size,
            expires_at: None,
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        bytes: Vec<u8>,
    ) -> Result<u64, StoreError> {
        let (upload_id, chunk_num, last_modified) = {
            let uploads = lock(&self.uploads);
            let upload = uploads.get(&session.handle).ok_or_else(|| {
                StoreError::SessionExpired(format!("Unknown upload {}", session.handle))
            })?;
            if offset != upload.cursor {
                return Err(StoreError::Rejected {
                    status: 416,
                    message: format!("Expected offset {}, got {offset}", upload.cursor),
                });
            }
            (
                upload.upload_id.clone(),
                upload.next_chunk,
                upload.request.last_modified,
            )
        };

        let len = bytes.len() as u64;
        let last = offset + len >= session.total_size;
        let url = self.client.url(Endpoint::FsContentChunked, &session.path)?;
        let mut request = self
            .client
            .request(Method::POST, url)
            .header(CHUNK_NUM_HEADER, chunk_num)
            .header(CONTENT_LENGTH, len)
            .body(bytes);
        if let Some(id) = &upload_id {
            request = request.header(UPLOAD_ID_HEADER, id.as_str());
        }
        if last {
            request = request.header(LAST_CHUNK_HEADER, "true");
            if let Some(modified) = last_modified {
                request = request.header(LAST_MODIFIED, modified.to_rfc2822());
            }
        }

        debug!(path = %session.path, chunk_num, offset, len, last, "Uploading chunk");
        let response = match self.client.send_once(request).await {
            Ok(response) => response,
            // Egnyte forgets unfinished uploads after a while
            Err(StoreError::NotFound(message)) if upload_id.is_some() => {
                return Err(StoreError::SessionExpired(message))
            }
            Err(e) => return Err(e),
        };

        let returned_id = response
            .headers()
            .get(UPLOAD_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let upload_id = match (upload_id, returned_id) {
            (Some(id), _) => id,
            (None, Some(id)) => id,
            (None, None) => {
                return Err(StoreError::InvalidResponse(format!(
                    "First chunk of {} returned no upload id",
                    session.path
                )))
            }
        };

        let cursor = offset + len;
        if let Some(upload) = lock(&self.uploads).get_mut(&session.handle) {
            upload.upload_id = Some(upload_id);
            upload.next_chunk = chunk_num + 1;
            upload.cursor = cursor;
        }
        Ok(cursor)
    }

    async fn complete_upload(&self, session: &UploadSession) -> Result<FileRecord, StoreError> {
        let state = lock(&self.uploads)
            .get(&session.handle)
            .map(|upload| (upload.cursor, upload.request.clone()));
        let Some((cursor, request)) = state else {
            return Err(StoreError::SessionExpired(format!(
                "Unknown upload {}",
                session.handle
            )));
        };

        if session.total_size == 0 {
            self.upload_whole(&request).await?;
        } else if cursor < session.total_size {
            return Err(StoreError::Rejected {
                status: 409,
                message: format!(
                    "Upload of {} incomplete: {cursor} of {} bytes",
                    session.path, session.total_size
                ),
            });
        }

        let record = self.get(&session.path).await?;
        lock(&self.uploads).remove(&session.handle);
        Ok(record)
    }

    async fn abort_upload(&self, session: &UploadSession) -> Result<(), StoreError> {
        // Egnyte discards unfinished chunked uploads on its own
        if lock(&self.uploads).remove(&session.handle).is_some() {
            debug!(path = %session.path, handle = %session.handle, "Dropped chunked upload");
        }
        Ok(())
    }

    async fn delete(&self, path: &RemotePath) -> Result<DeleteOutcome, StoreError> {
        let url = self.client.url(Endpoint::Fs, path)?;
        let result = self
            .client
            .send("delete", || self.client.request(Method::DELETE, url.clone()))
            .await;
        match result {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(StoreError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }
}
