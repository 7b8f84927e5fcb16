//! FileRecord domain entity
//!
//! A `FileRecord` is the provider-neutral view of one item in a remote store,
//! materialized fresh from every listing call. Records are never mutated,
//! only compared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RemotePath;

/// Opaque provider-supplied content hash
///
/// Providers hash content with different algorithms (Egnyte reports SHA-512,
/// Graph reports quickXorHash), so two checksums only say anything about
/// equality when their algorithms match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    /// Algorithm identifier, lowercase (e.g. "sha512", "quickxorhash")
    pub algorithm: String,
    /// Encoded digest as reported by the provider
    pub value: String,
}

impl Checksum {
    /// Creates a checksum, normalizing the algorithm name to lowercase
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into().to_ascii_lowercase(),
            value: value.into(),
        }
    }

    /// Returns true if both checksums use the same algorithm
    pub fn comparable_with(&self, other: &Checksum) -> bool {
        self.algorithm == other.algorithm
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Metadata for one file or folder in a remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Provider-relative, slash-separated path
    pub path: RemotePath,
    /// Size in bytes (0 for folders)
    pub size_bytes: u64,
    /// Last modification time (UTC)
    pub last_modified: DateTime<Utc>,
    /// Content hash, when the provider exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Whether this record is a folder
    #[serde(default)]
    pub is_folder: bool,
}

impl FileRecord {
    /// Creates a file record without a checksum
    pub fn file(path: RemotePath, size_bytes: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            path,
            size_bytes,
            last_modified,
            checksum: None,
            is_folder: false,
        }
    }

    /// Creates a folder record
    pub fn folder(path: RemotePath, last_modified: DateTime<Utc>) -> Self {
        Self {
            path,
            size_bytes: 0,
            last_modified,
            checksum: None,
            is_folder: true,
        }
    }

    /// Builder-style setter for the checksum
    #[must_use]
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Returns the checksum pair if both records carry comparable checksums
    pub fn comparable_checksums<'a>(
        &'a self,
        other: &'a FileRecord,
    ) -> Option<(&'a Checksum, &'a Checksum)> {
        match (&self.checksum, &other.checksum) {
            (Some(a), Some(b)) if a.comparable_with(b) => Some((a, b)),
            _ => None,
        }
    }

    /// Content equality between two records, ignoring their paths
    ///
    /// Comparable checksums are authoritative. Otherwise the records are equal
    /// when sizes match and modification times are within `mtime_tolerance`.
    pub fn same_content(&self, other: &FileRecord, mtime_tolerance: chrono::Duration) -> bool {
        if let Some((a, b)) = self.comparable_checksums(other) {
            return a.value == b.value;
        }

        let skew = (self.last_modified - other.last_modified).abs();
        self.size_bytes == other.size_bytes && skew <= mtime_tolerance
    }
}
