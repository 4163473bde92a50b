//! Path-oriented content operations over a remote object store
//!
//! The object store only knows ids and parent references. The adapter maps
//! root-relative paths onto that tree: it resolves parent folders by name
//! (creating them on upload), reuses same-name files, and places downloads
//! at the path their parent chain describes. Resolved folder ids go into
//! the configuration's [`FolderCache`].
//!
//! Every remote call is bounded by a timeout and aborted when the current
//! cancellation token fires.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tandem_core::domain::newtypes::{RelativePath, RemoteId};
use tandem_core::hashing::compute_md5_async;
use tandem_core::ports::{
    DownloadOutcome, IRemoteContentStore, IRemoteObjectStore, RemoteError, RemoteObject,
    UploadOutcome,
};

use crate::folder_cache::FolderCache;
use crate::ignore::INTERNAL_DIR;
use crate::remote::is_downloadable;

/// Parent chains deeper than this are treated as outside the watched folder
const MAX_FOLDER_DEPTH: usize = 64;

/// `IRemoteContentStore` for one sync configuration
pub struct RemoteContentAdapter {
    objects: Arc<dyn IRemoteObjectStore>,
    folders: Arc<FolderCache>,
    root: PathBuf,
    timeout: Duration,
    cancel: Mutex<CancellationToken>,
    temp_seq: AtomicU64,
}

impl RemoteContentAdapter {
    /// Creates an adapter writing downloads under the local `root`
    pub fn new(
        objects: Arc<dyn IRemoteObjectStore>,
        folders: Arc<FolderCache>,
        root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            objects,
            folders,
            root: root.into(),
            timeout,
            cancel: Mutex::new(CancellationToken::new()),
            temp_seq: AtomicU64::new(0),
        }
    }

    /// Makes subsequent calls fail with `RemoteError::Cancelled` once `token` fires
    pub fn set_cancellation(&self, token: CancellationToken) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn folders(&self) -> &Arc<FolderCache> {
        &self.folders
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs one remote call under the timeout and cancellation token
    async fn call<T, F>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(RemoteError::Cancelled),
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(RemoteError::Timeout(self.timeout)),
            },
        }
    }

    // ========================================================================
    // Folder resolution
    // ========================================================================

    /// Resolves the folder holding `rel_path`, creating missing folders
    ///
    /// # Errors
    /// Returns the first failing lookup or creation
    pub async fn ensure_parent_folders(
        &self,
        rel_path: &RelativePath,
    ) -> Result<RemoteId, RemoteError> {
        match rel_path.parent() {
            None => Ok(self.folders.root().clone()),
            Some(dir) => self
                .resolve_folder(&dir, true)
                .await?
                .ok_or_else(|| RemoteError::NotFound(dir.to_string())),
        }
    }

    /// Looks up the folder for a local directory without creating anything
    pub async fn locate_folder(
        &self,
        dir: &RelativePath,
    ) -> Result<Option<RemoteId>, RemoteError> {
        self.resolve_folder(dir, false).await
    }

    async fn resolve_folder(
        &self,
        dir: &RelativePath,
        create: bool,
    ) -> Result<Option<RemoteId>, RemoteError> {
        if let Some(id) = self.folders.get(Some(dir)) {
            return Ok(Some(id));
        }

        let mut parent = self.folders.root().clone();
        let mut walked: Option<RelativePath> = None;

        for segment in dir.segments() {
            let current = match &walked {
                None => RelativePath::new(segment),
                Some(prefix) => prefix.join(segment),
            }
            .map_err(|e| RemoteError::Unsupported(e.to_string()))?;

            let id = match self.folders.get(Some(&current)) {
                Some(id) => id,
                None => {
                    let found = self
                        .call(self.objects.find_child(&parent, segment, true))
                        .await?;
                    let id = match found {
                        Some(folder) => folder.id,
                        None if create => {
                            let folder = self
                                .call(self.objects.create_folder(&parent, segment))
                                .await?;
                            info!(path = %current, remote_id = %folder.id, "Created remote folder");
                            folder.id
                        }
                        None => return Ok(None),
                    };
                    self.folders.insert(&current, id.clone());
                    id
                }
            };

            parent = id;
            walked = Some(current);
        }

        Ok(Some(parent))
    }

    /// Root-relative path of a remote object, from its parent chain
    ///
    /// Returns `None` when the chain does not reach the watched folder.
    async fn resolve_rel_path(
        &self,
        object: &RemoteObject,
    ) -> Result<Option<RelativePath>, RemoteError> {
        let mut names = vec![object.name.clone()];
        let mut parent = object.parents.first().cloned();
        let mut reached_root = false;

        for _ in 0..MAX_FOLDER_DEPTH {
            let Some(current) = parent else {
                return Ok(None);
            };
            if &current == self.folders.root() {
                reached_root = true;
                break;
            }
            if let Some(known) = self.folders.path_of(&current) {
                names.extend(known.segments().rev().map(str::to_string));
                reached_root = true;
                break;
            }
            let folder = match self.call(self.objects.get_metadata(&current)).await {
                Ok(folder) => folder,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };
            names.push(folder.name.clone());
            parent = folder.parents.first().cloned();
        }

        if !reached_root {
            debug!(name = %object.name, "Parent chain too deep, treating as outside the tree");
            return Ok(None);
        }
        names.reverse();
        Ok(RelativePath::new(names.join("/")).ok())
    }

    /// Trashes the remote folder at `dir` if there is one
    ///
    /// Returns whether a folder was found.
    pub async fn delete_folder(&self, dir: &RelativePath) -> Result<bool, RemoteError> {
        let parent = match dir.parent() {
            None => Some(self.folders.root().clone()),
            Some(p) => self.resolve_folder(&p, false).await?,
        };
        let Some(parent) = parent else {
            return Ok(false);
        };

        match self
            .call(self.objects.find_child(&parent, dir.file_name(), true))
            .await?
        {
            Some(folder) => {
                self.call(self.objects.trash(&folder.id)).await?;
                self.folders.evict_tree(dir);
                info!(path = %dir, remote_id = %folder.id, "Trashed remote folder");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn temp_path(&self, remote_id: &RemoteId) -> PathBuf {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(INTERNAL_DIR)
            .join("tmp")
            .join(format!("{}-{seq}.part", remote_id.as_str()))
    }
}

#[async_trait::async_trait]
impl IRemoteContentStore for RemoteContentAdapter {
    #[tracing::instrument(skip(self, local_abs_path), fields(path = %rel_path))]
    async fn upload(
        &self,
        rel_path: &RelativePath,
        local_abs_path: &Path,
    ) -> Result<UploadOutcome, RemoteError> {
        let parent = self.ensure_parent_folders(rel_path).await?;
        let name = rel_path.file_name();

        let existing = self
            .call(self.objects.find_child(&parent, name, false))
            .await?;
        let object = match existing {
            Some(file) => {
                debug!(remote_id = %file.id, "Updating existing remote file");
                self.call(self.objects.update_file(&file.id, local_abs_path))
                    .await?
            }
            None => {
                self.call(self.objects.create_file(&parent, name, local_abs_path))
                    .await?
            }
        };

        let md5 = match object.md5 {
            Some(md5) => md5,
            None => compute_md5_async(local_abs_path.to_path_buf()).await?,
        };

        Ok(UploadOutcome {
            remote_id: object.id,
            md5,
            modified: object.modified.unwrap_or_else(Utc::now),
        })
    }

    #[tracing::instrument(skip(self), fields(remote_id = %remote_id))]
    async fn download(
        &self,
        remote_id: &RemoteId,
        suggested_name: &str,
    ) -> Result<DownloadOutcome, RemoteError> {
        let object = self.call(self.objects.get_metadata(remote_id)).await?;
        if object.trashed {
            return Err(RemoteError::NotFound(remote_id.to_string()));
        }
        if object.is_folder || !is_downloadable(object.mime_type.as_deref()) {
            return Err(RemoteError::Unsupported(format!(
                "{} ({})",
                object.name,
                object.mime_type.as_deref().unwrap_or("folder")
            )));
        }

        let rel_path = match self.resolve_rel_path(&object).await? {
            Some(rel) => rel,
            None => {
                warn!(name = suggested_name, "Parent chain unresolved, using suggested name");
                RelativePath::new(suggested_name)
                    .map_err(|e| RemoteError::Unsupported(e.to_string()))?
            }
        };

        let target = rel_path.to_local(&self.root);
        let temp = self.temp_path(remote_id);
        if let Some(dir) = temp.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        if let Err(e) = self.call(self.objects.download_to(remote_id, &temp)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        let md5 = match compute_md5_async(temp.clone()).await {
            Ok(md5) => md5,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e.into());
            }
        };
        if let Some(expected) = &object.md5 {
            if expected != &md5 {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(RemoteError::IntegrityMismatch {
                    expected: expected.to_string(),
                    actual: md5.to_string(),
                });
            }
        }

        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(path = %rel_path, md5 = %md5, "Download complete");
        Ok(DownloadOutcome { rel_path, md5 })
    }

    async fn create_folder(&self, rel_path: &RelativePath) -> Result<RemoteId, RemoteError> {
        self.resolve_folder(rel_path, true)
            .await?
            .ok_or_else(|| RemoteError::NotFound(rel_path.to_string()))
    }

    async fn delete(&self, rel_path: &RelativePath) -> Result<(), RemoteError> {
        let parent = match rel_path.parent() {
            None => Some(self.folders.root().clone()),
            Some(dir) => self.resolve_folder(&dir, false).await?,
        };
        let Some(parent) = parent else {
            debug!(path = %rel_path, "Remote parent absent, nothing to delete");
            return Ok(());
        };

        let name = rel_path.file_name();
        if let Some(file) = self
            .call(self.objects.find_child(&parent, name, false))
            .await?
        {
            self.call(self.objects.trash(&file.id)).await?;
            info!(path = %rel_path, remote_id = %file.id, "Trashed remote file");
            return Ok(());
        }

        if !self.delete_folder(rel_path).await? {
            debug!(path = %rel_path, "Nothing to delete remotely");
        }
        Ok(())
    }

    async fn metadata(&self, remote_id: &RemoteId) -> Result<RemoteObject, RemoteError> {
        self.call(self.objects.get_metadata(remote_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use tandem_core::hashing::md5_bytes;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Arc<InMemoryRemote>, RemoteContentAdapter) {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = Arc::new(InMemoryRemote::new());
        let folders = Arc::new(FolderCache::new(remote.root_id()));
        let adapter = RemoteContentAdapter::new(
            remote.clone(),
            folders,
            dir.path(),
            Duration::from_secs(5),
        );
        (dir, remote, adapter)
    }

    #[tokio::test]
    async fn test_upload_creates_parents_and_file() {
        let (dir, remote, adapter) = setup();
        let file = dir.path().join("a/b/c.txt");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"hello").unwrap();

        let outcome = adapter.upload(&rel("a/b/c.txt"), &file).await.unwrap();
        assert_eq!(outcome.md5, md5_bytes(b"hello"));

        let stored = remote.find_by_path("a/b/c.txt").unwrap();
        assert_eq!(stored.id, outcome.remote_id);
        assert_eq!(remote.content(&stored.id).unwrap(), b"hello");
        assert!(adapter.folders().get(Some(&rel("a/b"))).is_some());
    }

    #[tokio::test]
    async fn test_upload_updates_same_name_file_in_place() {
        let (dir, remote, adapter) = setup();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"one").unwrap();
        let first = adapter.upload(&rel("a.txt"), &file).await.unwrap();

        std::fs::write(&file, b"two").unwrap();
        let second = adapter.upload(&rel("a.txt"), &file).await.unwrap();

        assert_eq!(first.remote_id, second.remote_id);
        assert_eq!(remote.content(&first.remote_id).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_create_folder_is_idempotent() {
        let (_dir, remote, adapter) = setup();
        let first = adapter.create_folder(&rel("docs/2024")).await.unwrap();

        // Fresh cache: must find the existing folder instead of creating another
        let other = RemoteContentAdapter::new(
            remote.clone(),
            Arc::new(FolderCache::new(remote.root_id())),
            "/unused",
            Duration::from_secs(5),
        );
        let second = other.create_folder(&rel("docs/2024")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.children_named(&remote.root_id(), "docs").len(), 1);
    }

    #[tokio::test]
    async fn test_download_places_file_by_parent_chain() {
        let (dir, remote, adapter) = setup();
        let folder = remote.put_folder(&remote.root_id(), "notes");
        let file = remote.put_file(&folder.id, "todo.txt", b"milk");

        let outcome = adapter.download(&file.id, "todo.txt").await.unwrap();

        assert_eq!(outcome.rel_path, rel("notes/todo.txt"));
        assert_eq!(outcome.md5, md5_bytes(b"milk"));
        assert_eq!(std::fs::read(dir.path().join("notes/todo.txt")).unwrap(), b"milk");
    }

    #[tokio::test]
    async fn test_resolve_path_prefers_cached_folders() {
        let (_dir, remote, adapter) = setup();
        let a = remote.put_folder(&remote.root_id(), "a");
        let b = remote.put_folder(&a.id, "b");
        let file = remote.put_file(&b.id, "c.txt", b"c");

        let resolved = adapter.resolve_rel_path(&file).await.unwrap();
        assert_eq!(resolved, Some(rel("a/b/c.txt")));

        adapter.folders().insert(&rel("x/y"), b.id.clone());
        let resolved = adapter.resolve_rel_path(&file).await.unwrap();
        assert_eq!(resolved, Some(rel("x/y/c.txt")));
    }

    #[tokio::test]
    async fn test_resolve_path_gives_up_on_overlong_chain() {
        let (_dir, remote, adapter) = setup();
        let mut parent = remote.root_id();
        for depth in 0..MAX_FOLDER_DEPTH + 1 {
            parent = remote.put_folder(&parent, &format!("d{depth}")).id;
        }
        let file = remote.put_file(&parent, "deep.txt", b"x");

        assert_eq!(adapter.resolve_rel_path(&file).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_download_rejects_native_documents() {
        let (_dir, remote, adapter) = setup();
        let doc = remote.put_native_document(&remote.root_id(), "Plan");
        let err = adapter.download(&doc.id, "Plan").await.unwrap_err();
        assert!(matches!(err, RemoteError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_download_checksum_mismatch_removes_partial_file() {
        let (dir, remote, adapter) = setup();
        let file = remote.put_file(&remote.root_id(), "a.txt", b"good");
        remote.corrupt_downloads(true);

        let err = adapter.download(&file.id, "a.txt").await.unwrap_err();

        assert!(matches!(err, RemoteError::IntegrityMismatch { .. }));
        assert!(!dir.path().join("a.txt").exists());
        let leftovers = std::fs::read_dir(dir.path().join(INTERNAL_DIR).join("tmp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_delete_trashes_file_and_ignores_absent() {
        let (_dir, remote, adapter) = setup();
        let file = remote.put_file(&remote.root_id(), "a.txt", b"x");

        adapter.delete(&rel("a.txt")).await.unwrap();
        assert!(remote.metadata_of(&file.id).unwrap().trashed);

        adapter.delete(&rel("missing.txt")).await.unwrap();
        adapter.delete(&rel("no/such/dir.txt")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_folder_evicts_cache() {
        let (_dir, remote, adapter) = setup();
        let id = adapter.create_folder(&rel("docs/old")).await.unwrap();

        adapter.delete(&rel("docs")).await.unwrap();

        assert!(adapter.folders().get(Some(&rel("docs"))).is_none());
        assert!(adapter.folders().get(Some(&rel("docs/old"))).is_none());
        assert!(remote.metadata_of(&id).unwrap().trashed);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_calls() {
        let (_dir, _remote, adapter) = setup();
        let token = CancellationToken::new();
        token.cancel();
        adapter.set_cancellation(token);

        let err = adapter.create_folder(&rel("x")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let (dir, remote, _) = setup();
        remote.set_latency(Duration::from_millis(200));
        let adapter = RemoteContentAdapter::new(
            remote.clone(),
            Arc::new(FolderCache::new(remote.root_id())),
            dir.path(),
            Duration::from_millis(20),
        );

        let err = adapter.metadata(&remote.root_id()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout(_)));
    }
}
