//! Remote store ports (driven/secondary ports)
//!
//! Two layers describe the remote side:
//!
//! - [`IRemoteObjectStore`] is the raw object API of a hierarchical store
//!   where every object has an opaque id and parent references.
//! - [`IRemoteContentStore`] is the path-oriented contract the engine uses:
//!   upload, download, create folder and delete by relative path.
//!
//! Both return [`RemoteError`] so callers can tell "not found" apart from
//! transport failures without string matching.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{ContentHash, RelativePath, RemoteId};

/// Errors surfaced by remote adapters
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The object does not exist (or is trashed)
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// Network, authentication or server failure
    #[error("remote transport error: {0}")]
    Transport(String),

    /// The call exceeded its deadline
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The object cannot be transferred as bytes
    #[error("unsupported remote object: {0}")]
    Unsupported(String),

    /// Downloaded bytes do not match the advertised checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Local filesystem failure while staging a transfer
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled before completion
    #[error("remote call cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    /// Failures worth retrying on a later cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::Timeout(_))
    }
}

/// Metadata of a remote object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: RemoteId,
    pub name: String,
    pub parents: Vec<RemoteId>,
    pub is_folder: bool,
    pub mime_type: Option<String>,
    /// Content checksum; absent for folders and native documents
    pub md5: Option<ContentHash>,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
    pub trashed: bool,
}

impl RemoteObject {
    /// Whether `parent` is one of the object's parents
    pub fn has_parent(&self, parent: &RemoteId) -> bool {
        self.parents.iter().any(|p| p == parent)
    }
}

/// Raw object API of a hierarchical remote store
#[async_trait::async_trait]
pub trait IRemoteObjectStore: Send + Sync {
    /// Finds a non-trashed child of `parent` by exact name
    async fn find_child(
        &self,
        parent: &RemoteId,
        name: &str,
        folder: bool,
    ) -> Result<Option<RemoteObject>, RemoteError>;

    async fn create_folder(&self, parent: &RemoteId, name: &str)
        -> Result<RemoteObject, RemoteError>;

    /// Creates a file whose content is read from `source`
    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        source: &Path,
    ) -> Result<RemoteObject, RemoteError>;

    /// Replaces the content of an existing file with the bytes of `source`
    async fn update_file(&self, id: &RemoteId, source: &Path)
        -> Result<RemoteObject, RemoteError>;

    async fn get_metadata(&self, id: &RemoteId) -> Result<RemoteObject, RemoteError>;

    /// Writes the content of a file to `dest`
    async fn download_to(&self, id: &RemoteId, dest: &Path) -> Result<(), RemoteError>;

    /// Moves an object to the trash; never erases
    async fn trash(&self, id: &RemoteId) -> Result<(), RemoteError>;
}

/// Result of pushing a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub remote_id: RemoteId,
    pub md5: ContentHash,
    pub modified: DateTime<Utc>,
}

/// Result of pulling a remote file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub rel_path: RelativePath,
    pub md5: ContentHash,
}

/// Path-oriented contract the engine drives
///
/// Implementations resolve relative paths against one configuration's
/// remote folder.
#[async_trait::async_trait]
pub trait IRemoteContentStore: Send + Sync {
    /// Uploads `local_abs_path` to `rel_path`, updating a same-name file in place
    async fn upload(
        &self,
        rel_path: &RelativePath,
        local_abs_path: &Path,
    ) -> Result<UploadOutcome, RemoteError>;

    /// Downloads an object into the local tree
    ///
    /// The local path is derived from the object's position under the
    /// watched folder; `suggested_name` is used when that can't be resolved.
    async fn download(
        &self,
        remote_id: &RemoteId,
        suggested_name: &str,
    ) -> Result<DownloadOutcome, RemoteError>;

    /// Returns the id of the folder at `rel_path`, creating it if needed
    async fn create_folder(&self, rel_path: &RelativePath) -> Result<RemoteId, RemoteError>;

    /// Trashes the file or folder at `rel_path`; absent paths are a no-op
    async fn delete(&self, rel_path: &RelativePath) -> Result<(), RemoteError>;

    /// Current metadata of an object
    async fn metadata(&self, remote_id: &RemoteId) -> Result<RemoteObject, RemoteError>;
}
