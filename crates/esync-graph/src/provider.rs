//! SharePoint document library store
//!
//! [`SharePointStore`] implements [`IFileStore`] over a Graph drive. Paths
//! are addressed with Graph's `root:{path}:` syntax, so no item ids are kept
//! between calls.
//!
//! Upload sessions are identified by their upload URL. Two cases need local
//! state, held per store instance:
//! - the final chunk's response carries the committed item, which is kept
//!   until `complete_upload` asks for it;
//! - zero-byte files cannot use a session at all, so `begin_upload` hands out
//!   an inline handle and `complete_upload` performs a simple PUT.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use esync_core::config::SharePointConfig;
use esync_core::domain::{FileRecord, RemotePath, UploadRequest, UploadSession};
use esync_core::ports::{
    ByteRange, ByteStream, DeleteOutcome, IFileStore, RecordStream, StoreError, ThrottleObserver,
};
use futures_util::{future, stream, StreamExt, TryStreamExt};
use reqwest::header::RANGE;
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use crate::client::{self, GraphClient, GRAPH_BASE_URL};
use crate::items::{ChildrenPage, DriveItem};
use crate::upload::{self, ChunkResult};
use crate::GraphError;

const INLINE_PREFIX: &str = "inline:";

/// Default `$top` for children listings
const DEFAULT_PAGE_SIZE: u32 = 200;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Page {
    First,
    Next(String),
    Done,
}

/// [`IFileStore`] backed by a SharePoint document library
#[derive(Debug)]
pub struct SharePointStore {
    client: GraphClient,
    page_size: u32,
    /// Final items returned by the last chunk, keyed by upload URL
    completed: Mutex<HashMap<String, DriveItem>>,
    /// Pending zero-byte uploads, keyed by inline handle
    inline: Mutex<HashMap<String, UploadRequest>>,
    next_inline: AtomicU64,
}

impl SharePointStore {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
            completed: Mutex::new(HashMap::new()),
            inline: Mutex::new(HashMap::new()),
            next_inline: AtomicU64::new(0),
        }
    }

    /// Builds a store from the `sharepoint` store section of the config
    pub fn from_config(
        config: &SharePointConfig,
        access_token: impl Into<String>,
    ) -> Result<Self, GraphError> {
        let base_url = config.base_url.as_deref().unwrap_or(GRAPH_BASE_URL);
        let client = GraphClient::with_base_url(access_token, config.drive_id.clone(), base_url)?
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

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    async fn fetch_page(&self, url: Url) -> Result<ChildrenPage, StoreError> {
        let response = self
            .client
            .send("list children", || self.client.request(Method::GET, url.clone()))
            .await?;
        client::json(response).await
    }
}

#[async_trait::async_trait]
impl IFileStore for SharePointStore {
    fn name(&self) -> &str {
        "sharepoint"
    }

    fn list<'a>(&'a self, path: &'a RemotePath) -> RecordStream<'a> {
        stream::try_unfold(Page::First, move |page| async move {
            let url = match page {
                Page::Done => return Ok::<_, StoreError>(None),
                Page::First => {
                    let mut url = self.client.item_url(path, Some("children"))?;
                    url.query_pairs_mut()
                        .append_pair("$top", &self.page_size.to_string());
                    url
                }
                Page::Next(link) => Url::parse(&link).map_err(|e| {
                    StoreError::InvalidResponse(format!("Invalid nextLink {link}: {e}"))
                })?,
            };

            let page = self.fetch_page(url).await?;
            debug!(%path, items = page.value.len(), more = page.next_link.is_some(), "Fetched children page");
            let next = page.next_link.map_or(Page::Done, Page::Next);
            let records: Vec<Result<FileRecord, StoreError>> = page
                .value
                .into_iter()
                .map(|item| item.record_in(path))
                .collect();
            Ok(Some((stream::iter(records), next)))
        })
        .try_flatten()
        .boxed()
    }

    async fn get(&self, path: &RemotePath) -> Result<FileRecord, StoreError> {
        let url = self.client.item_url(path, None)?;
        let response = self
            .client
            .send("get item", || self.client.request(Method::GET, url.clone()))
            .await?;
        let item: DriveItem = client::json(response).await?;
        item.into_record(path.clone())
    }

    #[instrument(skip_all, fields(%path, range = %range.header_value()))]
    async fn open_read(&self, path: &RemotePath, range: ByteRange) -> Result<ByteStream, StoreError> {
        if range.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let url = self.client.item_url(path, Some("content"))?;
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

        // A 200 carries the whole file; stop at the end of the range
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(client::transport_error));
        let bounded = body.scan(range.len(), |remaining, chunk| {
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
        Ok(bounded.boxed())
    }

    #[instrument(skip_all, fields(path = %request.path, size = request.total_size))]
    async fn begin_upload(&self, request: &UploadRequest) -> Result<UploadSession, StoreError> {
        if request.total_size == 0 {
            let handle = format!(
                "{INLINE_PREFIX}{}",
                self.next_inline.fetch_add(1, Ordering::Relaxed)
            );
            lock(&self.inline).insert(handle.clone(), request.clone());
            return Ok(UploadSession {
                handle,
                path: request.path.clone(),
                total_size: 0,
                expires_at: None,
            });
        }

        let created = upload::create_upload_session(&self.client, request).await?;
        Ok(UploadSession {
            handle: created.upload_url,
            path: request.path.clone(),
            total_size: request.total_size,
            expires_at: created.expiration_date_time,
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        bytes: Vec<u8>,
    ) -> Result<u64, StoreError> {
        if session.handle.starts_with(INLINE_PREFIX) {
            return Err(StoreError::Rejected {
                status: 416,
                message: "Zero-byte uploads take no chunks".to_string(),
            });
        }

        match upload::upload_chunk(&self.client, &session.handle, offset, bytes, session.total_size)
            .await?
        {
            ChunkResult::Accepted { next_offset } => Ok(next_offset),
            ChunkResult::Completed(item) => {
                lock(&self.completed).insert(session.handle.clone(), *item);
                Ok(session.total_size)
            }
        }
    }

    async fn complete_upload(&self, session: &UploadSession) -> Result<FileRecord, StoreError> {
        let inline = lock(&self.inline).get(&session.handle).cloned();
        if let Some(request) = inline {
            let item = upload::upload_empty(&self.client, &request).await?;
            lock(&self.inline).remove(&session.handle);
            return item.into_record(session.path.clone());
        }

        let item = lock(&self.completed).remove(&session.handle).ok_or_else(|| {
            StoreError::InvalidResponse(format!(
                "Upload of {} has not received its final chunk",
                session.path
            ))
        })?;
        item.into_record(session.path.clone())
    }

    async fn abort_upload(&self, session: &UploadSession) -> Result<(), StoreError> {
        if lock(&self.inline).remove(&session.handle).is_some() {
            return Ok(());
        }
        lock(&self.completed).remove(&session.handle);
        upload::abort_session(&self.client, &session.handle).await
    }

    async fn delete(&self, path: &RemotePath) -> Result<DeleteOutcome, StoreError> {
        let url = self.client.item_url(path, None)?;
        let result = self
            .client
            .send("delete item", || self.client.request(Method::DELETE, url.clone()))
            .await;
        match result {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(StoreError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }
}
