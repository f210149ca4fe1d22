//! Validated newtype wrappers for domain identifiers and paths
//!
//! Every identifier and path in the sync engine is wrapped in a newtype that
//! enforces its invariants at construction time. Once a value exists, the
//! rest of the engine can rely on it being well-formed:
//!
//! - [`ItemId`] / [`TransferId`] - UUID-backed identifiers
//! - [`LocalPath`] - absolute, normalized local filesystem path
//! - [`RemotePath`] - canonical remote path (`/`-rooted, no `//`, no `..`)
//! - [`ContentHash`] - lowercase hex digest of file content
//! - [`ChangeCursor`] - opaque cursor into the remote change feed
//!
//! ## Design Notes
//!
//! - Constructors return `Result<Self, DomainError>`; there is no way to
//!   hold an invalid value.
//! - `Display`/`FromStr`/`TryFrom<String>` are provided for wire and
//!   database round-trips.
//! - Serde uses `#[serde(transparent)]` where the inner representation is
//!   already canonical, and `try_from` where deserialization must
//!   re-validate.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// ItemId
// ============================================================================

/// Stable identifier for a [`SyncItem`](super::sync_item::SyncItem)
///
/// Backed by a v4 UUID. Identifiers survive renames and moves; they are the
/// primary key of the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generates a new random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID (e.g., loaded from the database)
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidIdentifier {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// TransferId
// ============================================================================

/// Identifier for one active transfer (one bandwidth allocation)
///
/// Distinct from [`ItemId`]: a single item may be transferred many times
/// over its life, and each attempt gets a fresh transfer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Generates a new random transfer identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidIdentifier {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// LocalPath
// ============================================================================

/// Absolute, normalized path on the local filesystem
///
/// Invariants:
/// - absolute (rejects relative paths)
/// - contains no `.` or `..` components (normalized at construction)
///
/// `LocalPath` deliberately does not require the path to exist; it describes
/// where an item lives or will live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalPath(PathBuf);

impl LocalPath {
    /// Creates a new `LocalPath` from an absolute path
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidPath`] if the path is relative or
    /// contains `..` components that would escape the filesystem root.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath {
                path: path.display().to_string(),
                reason: "path must be absolute".to_string(),
            });
        }
        Ok(Self(Self::normalize(&path)?))
    }

    /// Creates a `LocalPath` and verifies it lies within `root`
    ///
    /// Used when materializing remote items locally, so a malformed remote
    /// path can never write outside the sync root.
    pub fn new_within_root(
        path: impl Into<PathBuf>,
        root: &LocalPath,
    ) -> Result<Self, DomainError> {
        let candidate = Self::new(path)?;
        if !candidate.0.starts_with(&root.0) {
            return Err(DomainError::PathOutsideSyncRoot {
                path: candidate.0.display().to_string(),
                root: root.0.display().to_string(),
            });
        }
        Ok(candidate)
    }

    /// Collapses `.` components and resolves `..` lexically
    fn normalize(path: &Path) -> Result<PathBuf, DomainError> {
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                std::path::Component::CurDir => {}
                std::path::Component::ParentDir => {
                    if !out.pop() {
                        return Err(DomainError::InvalidPath {
                            path: path.display().to_string(),
                            reason: "path escapes the filesystem root".to_string(),
                        });
                    }
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    /// Appends a relative component, rejecting traversal
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidPath`] if `segment` is absolute or
    /// contains `..`.
    pub fn join(&self, segment: impl AsRef<Path>) -> Result<Self, DomainError> {
        let segment = segment.as_ref();
        if segment.is_absolute() {
            return Err(DomainError::InvalidPath {
                path: segment.display().to_string(),
                reason: "join segment must be relative".to_string(),
            });
        }
        if segment
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(DomainError::InvalidPath {
                path: segment.display().to_string(),
                reason: "join segment must not contain '..'".to_string(),
            });
        }
        Ok(Self(self.0.join(segment)))
    }

    /// Returns the path relative to `root`, if this path lies under it
    pub fn relative_to(&self, root: &LocalPath) -> Option<&Path> {
        self.0.strip_prefix(&root.0).ok()
    }

    /// Returns the final component as a string, if any
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    /// Returns the parent directory, if this path has one
    pub fn parent(&self) -> Option<LocalPath> {
        self.0.parent().map(|p| Self(p.to_path_buf()))
    }

    /// Borrows the inner path
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<String> for LocalPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(PathBuf::from(value))
    }
}

impl From<LocalPath> for String {
    fn from(value: LocalPath) -> Self {
        value.0.display().to_string()
    }
}

impl AsRef<Path> for LocalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// RemotePath
// ============================================================================

/// Canonical path in the remote tree
///
/// Invariants:
/// - starts with `/`
/// - no empty segments (`//`)
/// - no `.` or `..` segments
/// - no trailing `/` except for the root itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Creates a new validated `RemotePath`
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidPath`] when any invariant is violated.
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(DomainError::InvalidPath {
                path,
                reason: "remote path must start with '/'".to_string(),
            });
        }
        if path == "/" {
            return Ok(Self(path));
        }
        let trimmed = path.trim_end_matches('/');
        for segment in trimmed[1..].split('/') {
            if segment.is_empty() {
                return Err(DomainError::InvalidPath {
                    path: path.clone(),
                    reason: "remote path contains an empty segment".to_string(),
                });
            }
            if segment == "." || segment == ".." {
                return Err(DomainError::InvalidPath {
                    path: path.clone(),
                    reason: "remote path contains a relative segment".to_string(),
                });
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The remote root (`/`)
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Appends one segment
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidPath`] if `segment` contains `/` or is
    /// a relative marker.
    pub fn join(&self, segment: &str) -> Result<Self, DomainError> {
        if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
            return Err(DomainError::InvalidPath {
                path: segment.to_string(),
                reason: "remote path segment must be a plain name".to_string(),
            });
        }
        if self.0 == "/" {
            Self::new(format!("/{segment}"))
        } else {
            Self::new(format!("{}/{segment}", self.0))
        }
    }

    /// Returns the last segment, if not the root
    pub fn name(&self) -> Option<&str> {
        if self.0 == "/" {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Returns the parent path, if not the root
    pub fn parent(&self) -> Option<RemotePath> {
        if self.0 == "/" {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Whether this path equals `ancestor` or lies beneath it
    ///
    /// Matches on whole segments: `/docs2` is not under `/docs`.
    pub fn is_under(&self, ancestor: &RemotePath) -> bool {
        if ancestor.0 == "/" {
            return true;
        }
        self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0)
                && self.0.as_bytes().get(ancestor.0.len()) == Some(&b'/'))
    }

    /// Borrows the canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RemotePath> for String {
    fn from(value: RemotePath) -> Self {
        value.0
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// Lowercase hex digest of file content (SHA-256)
///
/// Folders never carry a hash; comparing two `ContentHash` values is the
/// engine's definition of "same content".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Creates a validated hash from its hex form
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidHash`] if empty or not lowercase hex.
    pub fn new(hex: impl Into<String>) -> Result<Self, DomainError> {
        let hex = hex.into();
        if hex.is_empty() {
            return Err(DomainError::InvalidHash {
                reason: "hash must not be empty".to_string(),
            });
        }
        if !hex
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(DomainError::InvalidHash {
                reason: format!("hash must be lowercase hex, got '{hex}'"),
            });
        }
        Ok(Self(hex))
    }

    /// Borrows the hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

// ============================================================================
// ChangeCursor
// ============================================================================

/// Opaque cursor into the remote change feed
///
/// Returned by `get_changes` and persisted between reconciliation passes so
/// the engine only processes new remote activity. The contents are owned by
/// the transport; the engine never inspects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(String);

impl ChangeCursor {
    /// Wraps a cursor string handed back by the transport
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidIdentifier`] if the cursor is empty.
    pub fn new(cursor: impl Into<String>) -> Result<Self, DomainError> {
        let cursor = cursor.into();
        if cursor.is_empty() {
            return Err(DomainError::InvalidIdentifier {
                value: cursor,
                reason: "change cursor must not be empty".to_string(),
            });
        }
        Ok(Self(cursor))
    }

    /// Borrows the raw cursor
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod item_id_tests {
        use super::*;

        #[test]
        fn test_new_ids_are_unique() {
            assert_ne!(ItemId::new(), ItemId::new());
        }

        #[test]
        fn test_roundtrip_through_string() {
            let id = ItemId::new();
            let parsed: ItemId = id.to_string().parse().unwrap();
            assert_eq!(id, parsed);
        }

        #[test]
        fn test_rejects_garbage() {
            assert!("not-a-uuid".parse::<ItemId>().is_err());
        }
    }

    mod local_path_tests {
        use super::*;

        #[test]
        fn test_accepts_absolute_path() {
            let p = LocalPath::new("/home/user/docs/a.txt").unwrap();
            assert_eq!(p.to_string(), "/home/user/docs/a.txt");
        }

        #[test]
        fn test_rejects_relative_path() {
            assert!(LocalPath::new("docs/a.txt").is_err());
        }

        #[test]
        fn test_normalizes_dot_segments() {
            let p = LocalPath::new("/home/user/./docs/../notes.txt").unwrap();
            assert_eq!(p.to_string(), "/home/user/notes.txt");
        }

        #[test]
        fn test_rejects_escape_past_root() {
            assert!(LocalPath::new("/../../etc/passwd").is_err());
        }

        #[test]
        fn test_within_root_accepts_descendant() {
            let root = LocalPath::new("/sync").unwrap();
            assert!(LocalPath::new_within_root("/sync/a/b.txt", &root).is_ok());
        }

        #[test]
        fn test_within_root_rejects_outside() {
            let root = LocalPath::new("/sync").unwrap();
            assert!(LocalPath::new_within_root("/other/b.txt", &root).is_err());
        }

        #[test]
        fn test_join_rejects_traversal() {
            let p = LocalPath::new("/sync").unwrap();
            assert!(p.join("../evil").is_err());
            assert!(p.join("/abs").is_err());
            assert_eq!(p.join("sub/f.txt").unwrap().to_string(), "/sync/sub/f.txt");
        }

        #[test]
        fn test_relative_to() {
            let root = LocalPath::new("/sync").unwrap();
            let p = LocalPath::new("/sync/a/b.txt").unwrap();
            assert_eq!(p.relative_to(&root).unwrap(), Path::new("a/b.txt"));
        }
    }

    mod remote_path_tests {
        use super::*;

        #[test]
        fn test_accepts_rooted_path() {
            let p = RemotePath::new("/docs/report.pdf").unwrap();
            assert_eq!(p.as_str(), "/docs/report.pdf");
        }

        #[test]
        fn test_root_is_valid() {
            assert_eq!(RemotePath::root().as_str(), "/");
        }

        #[test]
        fn test_strips_trailing_slash() {
            assert_eq!(RemotePath::new("/docs/").unwrap().as_str(), "/docs");
        }

        #[test]
        fn test_rejects_unrooted() {
            assert!(RemotePath::new("docs/a").is_err());
        }

        #[test]
        fn test_rejects_double_slash() {
            assert!(RemotePath::new("/docs//a").is_err());
        }

        #[test]
        fn test_rejects_dot_dot() {
            assert!(RemotePath::new("/docs/../etc").is_err());
        }

        #[test]
        fn test_name_and_parent() {
            let p = RemotePath::new("/docs/report.pdf").unwrap();
            assert_eq!(p.name(), Some("report.pdf"));
            assert_eq!(p.parent().unwrap().as_str(), "/docs");
            assert_eq!(
                RemotePath::new("/top").unwrap().parent().unwrap().as_str(),
                "/"
            );
            assert!(RemotePath::root().parent().is_none());
        }

        #[test]
        fn test_join() {
            let p = RemotePath::root().join("docs").unwrap();
            assert_eq!(p.as_str(), "/docs");
            assert_eq!(p.join("a.txt").unwrap().as_str(), "/docs/a.txt");
            assert!(p.join("..").is_err());
            assert!(p.join("a/b").is_err());
        }

        #[test]
        fn test_is_under() {
            let docs = RemotePath::new("/docs").unwrap();
            assert!(RemotePath::new("/docs/a.txt").unwrap().is_under(&docs));
            assert!(RemotePath::new("/docs/sub/b.txt").unwrap().is_under(&docs));
            assert!(docs.is_under(&docs));
            assert!(docs.is_under(&RemotePath::root()));
            assert!(!RemotePath::new("/docs2/a.txt").unwrap().is_under(&docs));
            assert!(!RemotePath::new("/other").unwrap().is_under(&docs));
        }
    }

    mod content_hash_tests {
        use super::*;

        #[test]
        fn test_accepts_lowercase_hex() {
            assert!(ContentHash::new("deadbeef0123").is_ok());
        }

        #[test]
        fn test_rejects_uppercase() {
            assert!(ContentHash::new("DEADBEEF").is_err());
        }

        #[test]
        fn test_rejects_empty() {
            assert!(ContentHash::new("").is_err());
        }

        #[test]
        fn test_rejects_non_hex() {
            assert!(ContentHash::new("xyz123").is_err());
        }
    }

    mod change_cursor_tests {
        use super::*;

        #[test]
        fn test_rejects_empty() {
            assert!(ChangeCursor::new("").is_err());
        }

        #[test]
        fn test_preserves_opaque_value() {
            let c = ChangeCursor::new("cursor-token-42").unwrap();
            assert_eq!(c.as_str(), "cursor-token-42");
        }
    }
}
