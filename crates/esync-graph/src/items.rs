//! DriveItem payloads
//!
//! Graph describes files and folders as `driveItem` resources. Only the
//! fields the store needs are deserialized; everything is validated into a
//! [`FileRecord`] before it leaves this crate.

use chrono::{DateTime, Utc};
use esync_core::domain::{Checksum, FileRecord, RemotePath};
use esync_core::ports::StoreError;
use serde::Deserialize;

/// A Graph `driveItem`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// Server-side modification time
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    /// Client-controlled timestamps, set on upload
    #[serde(default)]
    pub file_system_info: Option<FileSystemInfo>,
    #[serde(default)]
    pub file: Option<FileFacet>,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemInfo {
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileFacet {
    #[serde(default)]
    pub hashes: Option<Hashes>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hashes {
    #[serde(default)]
    pub quick_xor_hash: Option<String>,
    #[serde(default)]
    pub sha256_hash: Option<String>,
}

/// One page of `/children`
#[derive(Debug, Deserialize)]
pub struct ChildrenPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    /// Modification time, preferring the client-set `fileSystemInfo` value
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.file_system_info
            .as_ref()
            .and_then(|info| info.last_modified_date_time)
            .or(self.last_modified_date_time)
    }

    /// SHA-256 when the library reports it, otherwise quickXorHash
    pub fn checksum(&self) -> Option<Checksum> {
        let hashes = self.file.as_ref()?.hashes.as_ref()?;
        if let Some(sha256) = hashes.sha256_hash.as_deref() {
            return Some(Checksum::new("sha256", sha256.to_ascii_lowercase()));
        }
        hashes
            .quick_xor_hash
            .as_deref()
            .map(|hash| Checksum::new("quickxorhash", hash))
    }

    /// Converts the item into a record at `path`
    pub fn into_record(self, path: RemotePath) -> Result<FileRecord, StoreError> {
        let modified = self.modified_at().ok_or_else(|| {
            StoreError::InvalidResponse(format!("Item {path} has no modification time"))
        })?;

        if self.is_folder() {
            return Ok(FileRecord::folder(path, modified));
        }

        let checksum = self.checksum();
        let record = FileRecord::file(path, self.size.unwrap_or(0), modified);
        Ok(match checksum {
            Some(checksum) => record.with_checksum(checksum),
            None => record,
        })
    }

    /// Converts a child of `parent` into a record
    pub fn record_in(self, parent: &RemotePath) -> Result<FileRecord, StoreError> {
        let path = parent
            .join(&self.name)
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        self.into_record(path)
    }
}
