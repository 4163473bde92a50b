//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for identifiers and values
//! that flow between the state store, the remote adapters and the engine.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Row ID types
// ============================================================================

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a database row id
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map(Self).map_err(|e| {
                    DomainError::InvalidId(format!("Invalid {}: {e}", stringify!($name)))
                })
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Identifier of a sync configuration (database row ID)
    ConfigId
);
row_id!(
    /// Identifier of a tracked sync item (database row ID)
    ItemId
);
row_id!(
    /// Identifier of a sync log entry (database row ID)
    LogEntryId
);

// ============================================================================
// Path types
// ============================================================================

/// A path relative to a sync root, always using `/` as separator
///
/// Relative paths are the key under which items are tracked, so they are
/// normalized on construction: no leading or trailing separator, no empty,
/// `.` or `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a new RelativePath
    ///
    /// Backslashes are treated as separators so paths produced on any
    /// platform normalize to the same key.
    ///
    /// # Errors
    /// Returns error if the path is empty, absolute, or contains traversal
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let raw: String = path.into();
        let unified = raw.replace('\\', "/");

        if unified.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Relative path must not be absolute: {raw}"
            )));
        }

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(DomainError::InvalidPath(format!(
                        "Relative path contains traversal: {raw}"
                    )))
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(DomainError::InvalidPath(
                "Relative path cannot be empty".to_string(),
            ));
        }

        Ok(Self(segments.join("/")))
    }

    /// Build a RelativePath from a filesystem path relative to a root
    ///
    /// # Errors
    /// Returns error if `path` is not inside `root`, or equals it
    pub fn from_root(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let relative = path.strip_prefix(root).map_err(|_| {
            DomainError::PathNotInSyncRoot(path.display().to_string())
        })?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
                Component::CurDir => continue,
                _ => {
                    return Err(DomainError::InvalidPath(format!(
                        "Unexpected path component in {}",
                        path.display()
                    )))
                }
            }
        }

        Self::new(segments.join("/"))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the `/`-separated segments
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment of the path
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Parent directory, or `None` for a top-level entry
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Replace the last segment with `name`
    ///
    /// # Errors
    /// Returns error if `name` is not a single valid segment
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(DomainError::InvalidPath(format!(
                "Invalid file name: {name}"
            )));
        }
        match self.parent() {
            Some(parent) => Self::new(format!("{}/{name}", parent.0)),
            None => Self::new(name),
        }
    }

    /// Append a single segment
    ///
    /// # Errors
    /// Returns error if `name` is not a single valid segment
    pub fn join(&self, name: &str) -> Result<Self, DomainError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {name}"
            )));
        }
        Ok(Self(format!("{}/{name}", self.0)))
    }

    /// Whether `self` equals `ancestor` or lives beneath it
    #[must_use]
    pub fn starts_with(&self, ancestor: &RelativePath) -> bool {
        self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0) && self.0[ancestor.0.len()..].starts_with('/'))
    }

    /// Resolve against an absolute root directory
    #[must_use]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |acc, s| acc.join(s))
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

// ============================================================================
// Remote store types
// ============================================================================

/// Opaque identifier of an object in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace or separators
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id: String = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        if id.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

/// MD5 content fingerprint, lowercase hex
///
/// Both sides of a sync are compared through this value: the local file
/// digest and the checksum reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of an MD5 digest rendered as hex
    const HEX_LEN: usize = 32;

    /// Create a new ContentHash, normalizing to lowercase
    ///
    /// # Errors
    /// Returns error if the value is not 32 hex characters
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash: String = hash.into();
        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Hash has wrong length: expected {} hex chars, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "Hash is not hexadecimal: {hash}"
            )));
        }

        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Build a ContentHash from raw digest bytes
    ///
    /// # Errors
    /// Returns error if `bytes` is not 16 bytes long
    pub fn from_digest(bytes: &[u8]) -> Result<Self, DomainError> {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self::new(hex)
    }

    /// Build a ContentHash from a complete MD5 digest
    pub fn from_md5(digest: [u8; 16]) -> Self {
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
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

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Opaque continuation cursor for the remote change feed
///
/// The cursor is opaque - we don't validate its contents, only that it's non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeCursor(String);

impl ChangeCursor {
    /// Create a new ChangeCursor
    ///
    /// # Errors
    /// Returns error if the cursor is empty
    pub fn new(cursor: impl Into<String>) -> Result<Self, DomainError> {
        let cursor: String = cursor.into();
        if cursor.is_empty() {
            return Err(DomainError::InvalidCursor(
                "Change cursor cannot be empty".to_string(),
            ));
        }
        Ok(Self(cursor))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChangeCursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeCursor {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChangeCursor {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ChangeCursor> for String {
    fn from(cursor: ChangeCursor) -> Self {
        cursor.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod row_id_tests {
        use super::*;

        #[test]
        fn test_display_and_parse() {
            let id = ConfigId::new(42);
            assert_eq!(id.to_string(), "42");
            let parsed: ConfigId = "42".parse().unwrap();
            assert_eq!(parsed, id);
        }

        #[test]
        fn test_parse_invalid() {
            let result: Result<ItemId, _> = "abc".parse();
            assert!(matches!(result, Err(DomainError::InvalidId(_))));
        }
    }

    mod relative_path_tests {
        use super::*;

        #[test]
        fn test_normalizes_separators() {
            let path = RelativePath::new("docs//notes/./a.txt/").unwrap();
            assert_eq!(path.as_str(), "docs/notes/a.txt");

            let path = RelativePath::new("docs\\b.txt").unwrap();
            assert_eq!(path.as_str(), "docs/b.txt");
        }

        #[test]
        fn test_rejects_invalid() {
            assert!(RelativePath::new("").is_err());
            assert!(RelativePath::new("/abs/path").is_err());
            assert!(RelativePath::new("a/../b").is_err());
            assert!(RelativePath::new("./").is_err());
        }

        #[test]
        fn test_parent_and_file_name() {
            let path = RelativePath::new("a/b/c.txt").unwrap();
            assert_eq!(path.file_name(), "c.txt");
            assert_eq!(path.parent().unwrap().as_str(), "a/b");

            let top = RelativePath::new("c.txt").unwrap();
            assert!(top.parent().is_none());
        }

        #[test]
        fn test_segments_both_directions() {
            let path = RelativePath::new("a/b/c.txt").unwrap();
            assert_eq!(path.segments().collect::<Vec<_>>(), vec!["a", "b", "c.txt"]);
            assert_eq!(path.segments().rev().collect::<Vec<_>>(), vec!["c.txt", "b", "a"]);
        }

        #[test]
        fn test_with_file_name() {
            let path = RelativePath::new("a/b.txt").unwrap();
            let renamed = path.with_file_name("b.conflict.txt").unwrap();
            assert_eq!(renamed.as_str(), "a/b.conflict.txt");
            assert!(path.with_file_name("x/y").is_err());
        }

        #[test]
        fn test_from_root() {
            let root = Path::new("/sync");
            let path = RelativePath::from_root(root, Path::new("/sync/docs/a.txt")).unwrap();
            assert_eq!(path.as_str(), "docs/a.txt");

            assert!(RelativePath::from_root(root, Path::new("/other/a.txt")).is_err());
            assert!(RelativePath::from_root(root, Path::new("/sync")).is_err());
        }

        #[test]
        fn test_starts_with() {
            let dir = RelativePath::new("docs").unwrap();
            assert!(RelativePath::new("docs/a.txt").unwrap().starts_with(&dir));
            assert!(RelativePath::new("docs").unwrap().starts_with(&dir));
            assert!(!RelativePath::new("docs2/a.txt").unwrap().starts_with(&dir));
        }

        #[test]
        fn test_to_local() {
            let path = RelativePath::new("a/b.txt").unwrap();
            assert_eq!(path.to_local(Path::new("/sync")), PathBuf::from("/sync/a/b.txt"));
        }

        #[test]
        fn test_serde_roundtrip() {
            let path = RelativePath::new("a/b.txt").unwrap();
            let json = serde_json::to_string(&path).unwrap();
            assert_eq!(json, "\"a/b.txt\"");
            let parsed: RelativePath = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, path);
        }
    }

    mod remote_id_tests {
        use super::*;

        #[test]
        fn test_valid() {
            let id = RemoteId::new("1AbC_def-9").unwrap();
            assert_eq!(id.as_str(), "1AbC_def-9");
        }

        #[test]
        fn test_invalid() {
            assert!(RemoteId::new("").is_err());
            assert!(RemoteId::new("has space").is_err());
            assert!(RemoteId::new("a/b").is_err());
        }
    }

    mod content_hash_tests {
        use super::*;

        #[test]
        fn test_lowercases() {
            let hash = ContentHash::new("5D41402ABC4B2A76B9719D911017C592").unwrap();
            assert_eq!(hash.as_str(), "5d41402abc4b2a76b9719d911017c592");
        }

        #[test]
        fn test_rejects_bad_values() {
            assert!(ContentHash::new("").is_err());
            assert!(ContentHash::new("xyz").is_err());
            assert!(ContentHash::new("zz41402abc4b2a76b9719d911017c592").is_err());
        }

        #[test]
        fn test_from_digest() {
            let hash = ContentHash::from_digest(&[0xab; 16]).unwrap();
            assert_eq!(hash.as_str(), "abababababababababababababababab");
            assert!(ContentHash::from_digest(&[0; 4]).is_err());
        }
    }

    mod change_cursor_tests {
        use super::*;

        #[test]
        fn test_empty_rejected() {
            assert!(matches!(
                ChangeCursor::new(""),
                Err(DomainError::InvalidCursor(_))
            ));
            assert_eq!(ChangeCursor::new("42").unwrap().as_str(), "42");
        }
    }
}
