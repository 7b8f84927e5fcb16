//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Job identifier
// ============================================================================

/// Opaque unique token identifying one submitted sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random JobId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a JobId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid JobId: {e}")))
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Remote paths
// ============================================================================

/// A provider-relative, slash-separated path (must start with /)
///
/// Both Egnyte and SharePoint address items this way, e.g. "/Shared/Documents/file.pdf".
/// Segments are never empty, `.` or `..`, and there is no trailing slash except
/// for the root itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// # Errors
    /// Returns error if path doesn't start with / or contains invalid segments
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path must start with '/': {path}"
            )));
        }

        if path == "/" {
            return Ok(Self(path));
        }

        if path.ends_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path has a trailing slash: {path}"
            )));
        }

        for segment in path[1..].split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(DomainError::InvalidRemotePath(format!(
                    "Remote path contains invalid segment '{segment}': {path}"
                )));
            }
        }

        Ok(Self(path))
    }

    /// Create the root path "/"
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Number of segments below the root ("/" is 0, "/a/b.txt" is 2)
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// Join a single path component
    ///
    /// # Errors
    /// Returns error if component is invalid
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty() || component.contains('/') || component == "." || component == ".."
        {
            return Err(DomainError::InvalidRemotePath(format!(
                "Invalid path component: {component}"
            )));
        }

        let new_path = if self.is_root() {
            format!("/{component}")
        } else {
            format!("{}/{component}", self.0)
        };

        Self::new(new_path)
    }

    /// Join a relative, slash-separated path such as "docs/a.txt"
    ///
    /// # Errors
    /// Returns error if any segment is invalid
    pub fn join_relative(&self, relative: &str) -> Result<Self, DomainError> {
        relative
            .split('/')
            .try_fold(self.clone(), |acc, segment| acc.join(segment))
    }

    /// Path of this item relative to `root`, without a leading slash
    ///
    /// # Errors
    /// Returns error if this path is not strictly below `root`
    pub fn relative_to(&self, root: &RemotePath) -> Result<String, DomainError> {
        let not_within = || {
            DomainError::PathNotInRoot(format!("{} is not within {}", self.0, root.0))
        };

        let rest = if root.is_root() {
            self.0.strip_prefix('/')
        } else {
            self.0
                .strip_prefix(root.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        };

        match rest {
            Some(rest) if !rest.is_empty() => Ok(rest.to_string()),
            _ => Err(not_within()),
        }
    }

    /// Get the parent path
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Get the file name component
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }

        self.0.rsplit('/').next()
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod job_id_tests {
        use super::*;

        #[test]
        fn test_new_creates_unique_ids() {
            assert_ne!(JobId::new(), JobId::new());
        }

        #[test]
        fn test_display_and_parse() {
            let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
            let id = JobId::from_uuid(uuid);
            assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");

            let parsed: JobId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
            assert_eq!(parsed, id);
        }

        #[test]
        fn test_parse_invalid() {
            let result: Result<JobId, _> = "job-42".parse();
            assert!(matches!(result, Err(DomainError::InvalidId(_))));
        }

        #[test]
        fn test_serde_transparent() {
            let id = JobId::new();
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{id}\""));
            let parsed: JobId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, parsed);
        }
    }

    mod remote_path_tests {
        use super::*;

        #[test]
        fn test_new_valid() {
            let path = RemotePath::new("/Shared/Documents/file.txt".to_string()).unwrap();
            assert_eq!(path.as_str(), "/Shared/Documents/file.txt");
        }

        #[test]
        fn test_root() {
            let root = RemotePath::root();
            assert_eq!(root.as_str(), "/");
            assert!(root.is_root());
            assert_eq!(root.depth(), 0);
        }

        #[test]
        fn test_invalid_paths() {
            for bad in [
                "Shared/file.txt",
                "/Shared//file.txt",
                "/Shared/../file.txt",
                "/Shared/./file.txt",
                "/Shared/",
            ] {
                assert!(RemotePath::new(bad.to_string()).is_err(), "{bad}");
            }
        }

        #[test]
        fn test_dots_inside_names_are_allowed() {
            let path = RemotePath::new("/Shared/report..final.pdf".to_string()).unwrap();
            assert_eq!(path.file_name(), Some("report..final.pdf"));
        }

        #[test]
        fn test_depth() {
            let path = RemotePath::new("/a/b/c.txt".to_string()).unwrap();
            assert_eq!(path.depth(), 3);
        }

        #[test]
        fn test_join() {
            let joined = RemotePath::root().join("Shared").unwrap();
            assert_eq!(joined.as_str(), "/Shared");

            let nested = joined.join("a.txt").unwrap();
            assert_eq!(nested.as_str(), "/Shared/a.txt");

            assert!(joined.join("a/b").is_err());
            assert!(joined.join("..").is_err());
        }

        #[test]
        fn test_join_relative() {
            let base = RemotePath::new("/Sites/Docs".to_string()).unwrap();
            let joined = base.join_relative("Projects/plan.docx").unwrap();
            assert_eq!(joined.as_str(), "/Sites/Docs/Projects/plan.docx");

            assert!(base.join_relative("Projects//plan.docx").is_err());
        }

        #[test]
        fn test_relative_to() {
            let root = RemotePath::new("/Shared".to_string()).unwrap();
            let child = RemotePath::new("/Shared/Documents/a.pdf".to_string()).unwrap();
            assert_eq!(child.relative_to(&root).unwrap(), "Documents/a.pdf");

            let from_root = child.relative_to(&RemotePath::root()).unwrap();
            assert_eq!(from_root, "Shared/Documents/a.pdf");
        }

        #[test]
        fn test_relative_to_rejects_siblings_and_self() {
            let root = RemotePath::new("/Shared".to_string()).unwrap();
            let sibling = RemotePath::new("/SharedOther/a.pdf".to_string()).unwrap();
            assert!(sibling.relative_to(&root).is_err());
            assert!(root.relative_to(&root).is_err());
        }

        #[test]
        fn test_parent_and_file_name() {
            let path = RemotePath::new("/Shared/Sub/file.txt".to_string()).unwrap();
            assert_eq!(path.parent().unwrap().as_str(), "/Shared/Sub");
            assert_eq!(path.file_name(), Some("file.txt"));

            let top = RemotePath::new("/file.txt".to_string()).unwrap();
            assert_eq!(top.parent().unwrap(), RemotePath::root());
            assert_eq!(RemotePath::root().file_name(), None);
            assert_eq!(RemotePath::root().parent(), None);
        }

        #[test]
        fn test_serde_rejects_invalid() {
            let result: Result<RemotePath, _> = serde_json::from_str("\"no-slash\"");
            assert!(result.is_err());
        }
    }
}
