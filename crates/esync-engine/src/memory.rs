//! In-memory file store
//!
//! Implements [`IFileStore`] over a `BTreeMap`. It backs the CLI's mock mode
//! (optionally seeded from a JSON fixture) and every engine test. Faults can
//! be injected per operation, per path or per chunk offset, and all calls are
//! counted so tests can assert on what actually went over the "wire".

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use esync_core::domain::{
    Checksum, DomainError, FileRecord, RemotePath, UploadRequest, UploadSession,
};
use esync_core::ports::{
    ByteRange, ByteStream, DeleteOutcome, IFileStore, RecordStream, StoreError,
};
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Operation a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    List,
    Get,
    OpenRead,
    BeginUpload,
    UploadChunk,
    CompleteUpload,
    Delete,
}

#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    path: Option<RemotePath>,
    offset: Option<u64>,
    error: StoreError,
    remaining: u32,
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingUpload {
    request: UploadRequest,
    data: Vec<u8>,
    expired: bool,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<RemotePath, StoredFile>,
    folders: BTreeSet<RemotePath>,
    uploads: HashMap<String, PendingUpload>,
    next_session: u64,
    faults: Vec<Fault>,
    corrupt_checksums: bool,
    stats: MemoryStats,
}

impl State {
    /// Pops a matching fault, if one is armed
    fn take_fault(&mut self, op: FaultOp, path: &RemotePath, offset: Option<u64>) -> Option<StoreError> {
        let index = self.faults.iter().position(|f| {
            f.op == op
                && f.remaining > 0
                && f.path.as_ref().map_or(true, |p| p == path)
                && f.offset.map_or(true, |o| Some(o) == offset)
        })?;
        let fault = &mut self.faults[index];
        if fault.remaining != u32::MAX {
            fault.remaining -= 1;
        }
        let error = fault.error.clone();
        if fault.remaining == 0 {
            self.faults.remove(index);
        }
        Some(error)
    }

    fn add_folders_above(&mut self, path: &RemotePath) {
        let mut current = path.parent();
        while let Some(folder) = current {
            if folder.is_root() {
                break;
            }
            current = folder.parent();
            self.folders.insert(folder);
        }
    }

    fn is_folder(&self, path: &RemotePath) -> bool {
        path.is_root() || self.folders.contains(path)
    }

    fn children(&self, folder: &RemotePath) -> Vec<FileRecord> {
        let is_child = |p: &RemotePath| p.parent().as_ref() == Some(folder);
        let folders = self
            .folders
            .iter()
            .filter(|p| is_child(p))
            .map(|p| FileRecord::folder(p.clone(), Utc::now()));
        let files = self
            .files
            .iter()
            .filter(|(p, _)| is_child(p))
            .map(|(p, f)| file_record(p, f));
        folders.chain(files).collect()
    }
}

fn file_record(path: &RemotePath, file: &StoredFile) -> FileRecord {
    FileRecord::file(path.clone(), file.data.len() as u64, file.last_modified)
        .with_checksum(Checksum::new("sha256", sha256_hex(&file.data)))
}

/// Call counters and request log
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Pages served by `list`
    pub list_pages: usize,
    /// `(start, end)` of every ranged read
    pub read_ranges: Vec<(u64, u64)>,
    /// Path and offset of every `upload_chunk` call, failed ones included
    pub chunk_uploads: Vec<(RemotePath, u64)>,
    pub sessions_opened: usize,
    /// Sessions currently open
    pub open_sessions: usize,
    /// Handles passed to `abort_upload`
    pub aborted_sessions: Vec<String>,
    pub completed_uploads: usize,
    pub deletes: Vec<RemotePath>,
    /// Highest number of reads and chunk uploads observed in flight at once
    pub max_concurrent_requests: usize,
}

impl MemoryStats {
    /// Offsets of every chunk sent for `path`, in call order
    pub fn upload_offsets(&self, path: &str) -> Vec<u64> {
        self.chunk_uploads
            .iter()
            .filter(|(p, _)| p.as_str() == path)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct FixtureEntry {
    path: String,
    #[serde(default)]
    folder: bool,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    size_bytes: Option<u64>,
    #[serde(default)]
    last_modified: Option<DateTime<Utc>>,
}

/// In-memory `IFileStore`
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    page_size: usize,
    read_chunk: usize,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_size: 100,
            read_chunk: 64 * 1024,
            latency: None,
            in_flight: AtomicUsize::new(0),
            state: Mutex::new(State::default()),
        }
    }

    /// Records per `list` page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Size of the pieces `open_read` streams
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    /// Delay added to every read and chunk upload
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Loads a store from a JSON fixture.
    ///
    /// The fixture is an array of entries with a `path` and either `content`
    /// (stored verbatim) or `size_bytes` (filled with a repeating pattern).
    /// Entries with `"folder": true` create empty folders.
    pub fn from_fixture(name: impl Into<String>, fixture: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(fixture)
            .with_context(|| format!("Failed to read fixture {}", fixture.display()))?;
        let entries: Vec<FixtureEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse fixture {}", fixture.display()))?;

        let store = Self::new(name);
        for entry in entries {
            let path = RemotePath::new(entry.path.clone())
                .with_context(|| format!("Invalid path in fixture: {}", entry.path))?;
            if entry.folder {
                store.insert_folder(path.as_str())?;
                continue;
            }
            let data = match (entry.content, entry.size_bytes) {
                (Some(content), _) => content.into_bytes(),
                (None, Some(size)) => (0..size).map(|i| (i % 251) as u8).collect(),
                (None, None) => Vec::new(),
            };
            let modified = entry.last_modified.unwrap_or_else(Utc::now);
            store.insert_file(path.as_str(), data, modified)?;
        }
        Ok(store)
    }

    /// Inserts or replaces a file, creating its parent folders
    pub fn insert_file(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let path = RemotePath::new(path.to_string())?;
        let mut state = lock(&self.state);
        state.add_folders_above(&path);
        state.files.insert(
            path,
            StoredFile {
                data: data.into(),
                last_modified,
            },
        );
        Ok(())
    }

    pub fn insert_folder(&self, path: &str) -> Result<(), DomainError> {
        let path = RemotePath::new(path.to_string())?;
        let mut state = lock(&self.state);
        state.add_folders_above(&path);
        if !path.is_root() {
            state.folders.insert(path);
        }
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.record(path).is_some()
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        let path = RemotePath::new(path.to_string()).ok()?;
        lock(&self.state).files.get(&path).map(|f| f.data.clone())
    }

    /// Metadata of a stored file
    pub fn record(&self, path: &str) -> Option<FileRecord> {
        let path = RemotePath::new(path.to_string()).ok()?;
        lock(&self.state).files.get(&path).map(|f| file_record(&path, f))
    }

    pub fn file_count(&self) -> usize {
        lock(&self.state).files.len()
    }

    /// Paths of all stored files, sorted
    pub fn file_paths(&self) -> Vec<String> {
        lock(&self.state)
            .files
            .keys()
            .map(|p| p.as_str().to_string())
            .collect()
    }

    /// Fails the next `times` calls of `op` (on `path`, if given) with `error`.
    /// `u32::MAX` keeps the fault armed forever.
    ///
    /// A path that does not parse matches nothing.
    pub fn inject_fault(&self, op: FaultOp, path: Option<&str>, error: StoreError, times: u32) {
        let path = match path.map(|p| RemotePath::new(p.to_string())) {
            None => None,
            Some(Ok(p)) => Some(p),
            Some(Err(_)) => return,
        };
        let fault = Fault {
            op,
            path,
            offset: None,
            error,
            remaining: times,
        };
        lock(&self.state).faults.push(fault);
    }

    /// Fails the next chunk upload at `offset` (any path) once
    pub fn inject_chunk_fault(&self, offset: u64, error: StoreError) {
        let fault = Fault {
            op: FaultOp::UploadChunk,
            path: None,
            offset: Some(offset),
            error,
            remaining: 1,
        };
        lock(&self.state).faults.push(fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.state).faults.clear();
    }

    /// Marks every open upload session as expired
    pub fn expire_sessions(&self) {
        for upload in lock(&self.state).uploads.values_mut() {
            upload.expired = true;
        }
    }

    /// Makes `complete_upload` report a checksum that matches nothing
    pub fn corrupt_checksums(&self, corrupt: bool) {
        lock(&self.state).corrupt_checksums = corrupt;
    }

    pub fn stats(&self) -> MemoryStats {
        lock(&self.state).stats.clone()
    }

    async fn simulate_request(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = lock(&self.state);
            state.stats.max_concurrent_requests = state.stats.max_concurrent_requests.max(current);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn list_page(&self, folder: &RemotePath, offset: usize) -> Result<Vec<FileRecord>, StoreError> {
        let mut state = lock(&self.state);
        if offset == 0 {
            if let Some(error) = state.take_fault(FaultOp::List, folder, None) {
                return Err(error);
            }
            if !state.is_folder(folder) {
                return Err(StoreError::NotFound(folder.to_string()));
            }
        }
        let page: Vec<FileRecord> = state
            .children(folder)
            .into_iter()
            .skip(offset)
            .take(self.page_size)
            .collect();
        if !page.is_empty() || offset == 0 {
            state.stats.list_pages += 1;
        }
        Ok(page)
    }
}

#[async_trait::async_trait]
impl IFileStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list<'a>(&'a self, path: &'a RemotePath) -> RecordStream<'a> {
        stream::try_unfold(Some(0usize), move |offset: Option<usize>| async move {
            let Some(offset) = offset else {
                return Ok::<_, StoreError>(None);
            };
            let page = self.list_page(path, offset)?;
            if page.is_empty() {
                return Ok(None);
            }
            let next = (page.len() == self.page_size).then_some(offset + page.len());
            Ok(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<FileRecord, StoreError>)))
        .try_flatten()
        .boxed()
    }

    async fn get(&self, path: &RemotePath) -> Result<FileRecord, StoreError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.take_fault(FaultOp::Get, path, None) {
            return Err(error);
        }
        if let Some(file) = state.files.get(path) {
            return Ok(file_record(path, file));
        }
        if state.is_folder(path) {
            return Ok(FileRecord::folder(path.clone(), Utc::now()));
        }
        Err(StoreError::NotFound(path.to_string()))
    }

    async fn open_read(&self, path: &RemotePath, range: ByteRange) -> Result<ByteStream, StoreError> {
        self.simulate_request().await;
        let data = {
            let mut state = lock(&self.state);
            if let Some(error) = state.take_fault(FaultOp::OpenRead, path, None) {
                return Err(error);
            }
            let file = state
                .files
                .get(path)
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            let len = file.data.len() as u64;
            let start = range.start.min(len) as usize;
            let end = range.end.unwrap_or(len).min(len) as usize;
            let data = file.data[start..end.max(start)].to_vec();
            state
                .stats
                .read_ranges
                .push((range.start, range.end.unwrap_or(len)));
            data
        };

        let pieces: Vec<Result<Vec<u8>, StoreError>> = data
            .chunks(self.read_chunk)
            .map(|piece| Ok(piece.to_vec()))
            .collect();
        Ok(stream::iter(pieces).boxed())
    }

    async fn begin_upload(&self, request: &UploadRequest) -> Result<UploadSession, StoreError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.take_fault(FaultOp::BeginUpload, &request.path, None) {
            return Err(error);
        }
        if state.is_folder(&request.path) {
            return Err(StoreError::Rejected {
                status: 409,
                message: format!("{} is a folder", request.path),
            });
        }
        state.next_session += 1;
        let handle = format!("{}-session-{}", self.name, state.next_session);
        state.uploads.insert(
            handle.clone(),
            PendingUpload {
                request: request.clone(),
                data: Vec::new(),
                expired: false,
            },
        );
        state.stats.sessions_opened += 1;
        state.stats.open_sessions += 1;
        debug!(store = %self.name, %handle, path = %request.path, "Upload session opened");

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
        self.simulate_request().await;
        let mut state = lock(&self.state);
        state
            .stats
            .chunk_uploads
            .push((session.path.clone(), offset));
        if let Some(error) = state.take_fault(FaultOp::UploadChunk, &session.path, Some(offset)) {
            return Err(error);
        }

        let expired = match state.uploads.get(&session.handle) {
            None => true,
            Some(upload) => upload.expired,
        };
        if expired {
            if state.uploads.remove(&session.handle).is_some() {
                state.stats.open_sessions -= 1;
            }
            return Err(StoreError::SessionExpired(session.handle.clone()));
        }

        let upload = state
            .uploads
            .get_mut(&session.handle)
            .ok_or_else(|| StoreError::SessionExpired(session.handle.clone()))?;
        let cursor = upload.data.len() as u64;
        if offset != cursor {
            return Err(StoreError::Rejected {
                status: 416,
                message: format!("expected offset {cursor}, got {offset}"),
            });
        }
        if cursor + bytes.len() as u64 > upload.request.total_size {
            return Err(StoreError::Rejected {
                status: 416,
                message: "chunk extends past declared size".to_string(),
            });
        }
        upload.data.extend_from_slice(&bytes);
        Ok(upload.data.len() as u64)
    }

    async fn complete_upload(&self, session: &UploadSession) -> Result<FileRecord, StoreError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.take_fault(FaultOp::CompleteUpload, &session.path, None) {
            return Err(error);
        }
        let upload = match state.uploads.remove(&session.handle) {
            Some(upload) if !upload.expired => upload,
            Some(_) | None => return Err(StoreError::SessionExpired(session.handle.clone())),
        };
        state.stats.open_sessions -= 1;

        if upload.data.len() as u64 != upload.request.total_size {
            return Err(StoreError::Rejected {
                status: 409,
                message: format!(
                    "upload incomplete: {} of {} bytes",
                    upload.data.len(),
                    upload.request.total_size
                ),
            });
        }

        let path = upload.request.path.clone();
        state.add_folders_above(&path);
        let file = StoredFile {
            data: upload.data,
            last_modified: upload.request.last_modified.unwrap_or_else(Utc::now),
        };
        let mut record = file_record(&path, &file);
        if state.corrupt_checksums {
            record.checksum = Some(Checksum::new("sha256", "0".repeat(64)));
        }
        state.files.insert(path, file);
        state.stats.completed_uploads += 1;
        Ok(record)
    }

    async fn abort_upload(&self, session: &UploadSession) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        state.stats.aborted_sessions.push(session.handle.clone());
        if state.uploads.remove(&session.handle).is_some() {
            state.stats.open_sessions -= 1;
        }
        Ok(())
    }

    async fn delete(&self, path: &RemotePath) -> Result<DeleteOutcome, StoreError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.take_fault(FaultOp::Delete, path, None) {
            return Err(error);
        }
        state.stats.deletes.push(path.clone());
        Ok(match state.files.remove(path) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}
