//! Fingerprint & diff engine
//!
//! Compares a source snapshot with a destination snapshot and produces the
//! ordered operations that converge the destination toward the source.
//!
//! Both snapshots are flattened to `relative path -> FileRecord` (folders are
//! dropped; they are created implicitly by the first upload below them).
//! Egnyte and SharePoint resolve paths case-insensitively, so relative paths
//! are matched after case folding and operations are named after the source.
//! Creates, updates and skips come first, shallow paths before deep ones;
//! deletes come last, deepest first. Ties break lexicographically, so equal
//! inputs always give the same output.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use esync_core::domain::{FileRecord, RemotePath, SyncOperation};
use esync_core::ports::{IFileStore, StoreError};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::rate_limit::{Direction, TransferRateLimiter};

/// Which side of the sync a tree belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSide {
    Source,
    Destination,
}

impl fmt::Display for TreeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeSide::Source => f.write_str("source"),
            TreeSide::Destination => f.write_str("destination"),
        }
    }
}

/// Errors that make a diff impossible; fatal to the whole job
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiffError {
    /// A folder of one side could not be listed
    #[error("Cannot enumerate {side} tree at {path}: {source}")]
    Enumerate {
        side: TreeSide,
        path: RemotePath,
        #[source]
        source: StoreError,
    },

    /// The same path appears twice in one snapshot, ignoring case
    #[error("Duplicate path in {side} snapshot: {path}")]
    DuplicatePath { side: TreeSide, path: RemotePath },

    /// A record lies outside the snapshot root
    #[error("{path} is outside the {side} root {root}")]
    OutsideRoot {
        side: TreeSide,
        path: RemotePath,
        root: RemotePath,
    },
}

/// A directory-tree snapshot of one store below `root`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub root: RemotePath,
    pub records: Vec<FileRecord>,
}

impl Snapshot {
    pub fn new(root: RemotePath, records: Vec<FileRecord>) -> Self {
        Self { root, records }
    }

    /// Snapshot with no records (e.g. a destination root that does not exist yet)
    pub fn empty(root: RemotePath) -> Self {
        Self {
            root,
            records: Vec::new(),
        }
    }

    /// Number of file (non-folder) records
    pub fn file_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_folder).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records
            .iter()
            .filter(|r| !r.is_folder)
            .map(|r| r.size_bytes)
            .sum()
    }

    /// Flattens to `folded relative path -> (relative path, record)`, dropping folders
    fn flatten(&self, side: TreeSide) -> Result<BTreeMap<String, (String, &FileRecord)>, DiffError> {
        let mut files = BTreeMap::new();
        for record in self.records.iter().filter(|r| !r.is_folder) {
            let relative = record
                .path
                .relative_to(&self.root)
                .map_err(|_| DiffError::OutsideRoot {
                    side,
                    path: record.path.clone(),
                    root: self.root.clone(),
                })?;
            if files
                .insert(fold_case(&relative), (relative, record))
                .is_some()
            {
                return Err(DiffError::DuplicatePath {
                    side,
                    path: record.path.clone(),
                });
            }
        }
        Ok(files)
    }
}

/// Key two paths share when a case-insensitive store treats them as one item
fn fold_case(relative: &str) -> String {
    relative.to_lowercase()
}

/// Knobs for the diff
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Plan deletes for destination-only files
    pub delete_extraneous: bool,
    /// Modification times closer than this compare equal
    pub mtime_tolerance: chrono::Duration,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            delete_extraneous: false,
            mtime_tolerance: chrono::Duration::seconds(2),
        }
    }
}

/// Computes the operations converging `destination` toward `source`.
///
/// Every source file maps to exactly one create, update or skip. Every
/// destination-only file maps to exactly one delete when
/// `delete_extraneous` is set, and is left alone otherwise.
pub fn diff(
    source: &Snapshot,
    destination: &Snapshot,
    options: &DiffOptions,
) -> Result<Vec<SyncOperation>, DiffError> {
    let source_files = source.flatten(TreeSide::Source)?;
    let destination_files = destination.flatten(TreeSide::Destination)?;

    let target = |relative: &str| {
        destination
            .root
            .join_relative(relative)
            .map_err(|_| DiffError::OutsideRoot {
                side: TreeSide::Destination,
                path: destination.root.clone(),
                root: destination.root.clone(),
            })
    };

    let mut transfers = Vec::with_capacity(source_files.len());
    for (key, (relative, record)) in &source_files {
        let destination_path = target(relative)?;
        let source = (*record).clone();
        let op = match destination_files.get(key) {
            None => SyncOperation::Create {
                source,
                destination: destination_path,
            },
            Some((_, existing)) if record.same_content(existing, options.mtime_tolerance) => {
                SyncOperation::Skip {
                    source,
                    destination: destination_path,
                }
            }
            Some(_) => SyncOperation::Update {
                source,
                destination: destination_path,
            },
        };
        transfers.push(op);
    }
    // Shallow before deep; BTreeMap iteration already gives lexicographic ties
    transfers.sort_by(|a, b| {
        a.destination()
            .depth()
            .cmp(&b.destination().depth())
            .then_with(|| a.destination().cmp(b.destination()))
    });

    let mut deletes = Vec::new();
    if options.delete_extraneous {
        for (key, (_, record)) in &destination_files {
            if !source_files.contains_key(key) {
                deletes.push(SyncOperation::Delete {
                    destination: record.path.clone(),
                });
            }
        }
        deletes.sort_by(|a, b| {
            b.destination()
                .depth()
                .cmp(&a.destination().depth())
                .then_with(|| a.destination().cmp(b.destination()))
        });
    }

    debug!(
        transfers = transfers.len(),
        deletes = deletes.len(),
        "Diff computed"
    );
    transfers.extend(deletes);
    Ok(transfers)
}

/// Lists every record below `root`, descending into folders breadth-first.
///
/// Each folder's listing is consumed lazily, one provider page at a time, and
/// takes one rate-limit token per folder. A destination root that does not
/// exist yields an empty snapshot; a missing source root is an error.
pub async fn walk_tree(
    store: &dyn IFileStore,
    root: &RemotePath,
    side: TreeSide,
    limiter: &TransferRateLimiter,
) -> Result<Snapshot, DiffError> {
    let direction = match side {
        TreeSide::Source => Direction::SourceRead,
        TreeSide::Destination => Direction::DestinationWrite,
    };

    let mut records = Vec::new();
    let mut pending = VecDeque::from([root.clone()]);

    while let Some(folder) = pending.pop_front() {
        limiter.acquire(direction).await;
        let mut listing = store.list(&folder);

        while let Some(item) = listing.next().await {
            let record = match item {
                Ok(record) => record,
                Err(StoreError::NotFound(_))
                    if side == TreeSide::Destination && &folder == root =>
                {
                    info!(store = store.name(), root = %root, "Destination root does not exist yet");
                    return Ok(Snapshot::empty(root.clone()));
                }
                Err(source) => {
                    if let StoreError::RateLimited { retry_after } = &source {
                        limiter.on_throttle(direction, *retry_after);
                    }
                    return Err(DiffError::Enumerate {
                        side,
                        path: folder.clone(),
                        source,
                    });
                }
            };
            if record.is_folder {
                pending.push_back(record.path.clone());
            }
            records.push(record);
        }
        limiter.on_success(direction);
    }

    let snapshot = Snapshot::new(root.clone(), records);
    info!(
        store = store.name(),
        %side,
        root = %root,
        files = snapshot.file_count(),
        bytes = snapshot.total_bytes(),
        "Tree enumerated"
    );
    Ok(snapshot)
}
