//! Egnyte file system payloads
//!
//! `GET /pubapi/v1/fs{path}` answers with a folder listing when `path` is a
//! folder and with the file's metadata when it is a file. File timestamps
//! are RFC 2822 strings; folder timestamps are epoch milliseconds.

use chrono::{DateTime, Utc};
use esync_core::domain::{Checksum, FileRecord, RemotePath};
use esync_core::ports::StoreError;
use serde::Deserialize;

/// A file entry, either inside a listing or as standalone metadata
#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub size: u64,
    /// SHA-512 of the current version, hex
    #[serde(default)]
    pub checksum: Option<String>,
    /// e.g. `"Sun, 26 Aug 2012 03:55:29 GMT"`
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub entry_id: Option<String>,
}

/// A folder entry inside a listing
#[derive(Debug, Clone, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, rename = "lastModified")]
    pub last_modified_ms: Option<i64>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// Response to a folder listing (`list_content=true`)
#[derive(Debug, Deserialize)]
pub struct FolderListing {
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl FolderListing {
    /// Number of entries on this page
    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Response to a metadata request on any path
#[derive(Debug, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub is_folder: bool,
    #[serde(flatten)]
    pub file: Option<FileEntry>,
    #[serde(default, rename = "lastModified")]
    pub folder_modified_ms: Option<i64>,
}

fn parse_modified(value: &str, path: &RemotePath) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc2822(value.trim())
        .or_else(|_| DateTime::parse_from_rfc3339(value.trim()))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::InvalidResponse(format!("Bad last_modified {value:?} on {path}: {e}"))
        })
}

fn folder_modified(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}

impl FileEntry {
    pub fn into_record(self, path: RemotePath) -> Result<FileRecord, StoreError> {
        let modified = match self.last_modified.as_deref() {
            Some(value) => parse_modified(value, &path)?,
            None => {
                return Err(StoreError::InvalidResponse(format!(
                    "File {path} has no last_modified"
                )))
            }
        };

        let record = FileRecord::file(path, self.size, modified);
        Ok(match self.checksum.filter(|c| !c.is_empty()) {
            Some(checksum) => record.with_checksum(Checksum::new("sha512", checksum.to_ascii_lowercase())),
            None => record,
        })
    }
}

impl FolderEntry {
    pub fn into_record(self, path: RemotePath) -> FileRecord {
        FileRecord::folder(path, folder_modified(self.last_modified_ms))
    }
}

impl FolderListing {
    /// Converts every entry on the page into a record below `parent`
    pub fn into_records(self, parent: &RemotePath) -> Vec<Result<FileRecord, StoreError>> {
        let child = |name: &str| {
            parent
                .join(name)
                .map_err(|e| StoreError::InvalidResponse(e.to_string()))
        };

        let folders = self
            .folders
            .into_iter()
            .map(|folder| child(&folder.name).map(|path| folder.into_record(path)));
        let files = self
            .files
            .into_iter()
            .map(|file| child(&file.name).and_then(|path| file.into_record(path)));
        folders.chain(files).collect()
    }
}

impl EntryMetadata {
    pub fn into_record(self, path: RemotePath) -> Result<FileRecord, StoreError> {
        if self.is_folder {
            return Ok(FileRecord::folder(path, folder_modified(self.folder_modified_ms)));
        }
        match self.file {
            Some(file) => file.into_record(path),
            None => Err(StoreError::InvalidResponse(format!(
                "Metadata for {path} is neither a file nor a folder"
            ))),
        }
    }
}
