//! In-process remote store
//!
//! [`InMemoryRemote`] implements both the object API and the change feed
//! over a map of objects. Every mutation is appended to a journal; a
//! feed cursor is simply an index into that journal. It backs the engine's
//! tests and local dry runs, and can simulate outages, latency and
//! corrupted transfers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;

use tandem_core::domain::newtypes::{ChangeCursor, RemoteId};
use tandem_core::hashing::md5_bytes;
use tandem_core::ports::{
    ChangePage, FeedChange, FeedFile, IRemoteChangeFeed, IRemoteObjectStore, RemoteError,
    RemoteObject,
};

use crate::remote::FOLDER_MIME_TYPE;

/// Changes returned per feed page unless overridden
pub const DEFAULT_PAGE_SIZE: usize = 100;

const ROOT_ID: &str = "root";

struct Stored {
    seq: u64,
    meta: RemoteObject,
    content: Vec<u8>,
}

struct State {
    objects: HashMap<RemoteId, Stored>,
    journal: Vec<FeedChange>,
    next_seq: u64,
}

impl State {
    fn record(&mut self, meta: &RemoteObject) {
        self.journal.push(FeedChange {
            remote_id: meta.id.clone(),
            removed: false,
            file: Some(FeedFile {
                name: meta.name.clone(),
                mime_type: meta.mime_type.clone(),
                parents: meta.parents.clone(),
                trashed: meta.trashed,
                md5: meta.md5.clone(),
                modified: meta.modified,
            }),
            time: Some(Utc::now()),
        });
    }

    fn insert(
        &mut self,
        parent: &RemoteId,
        name: &str,
        mime_type: Option<&str>,
        content: Option<Vec<u8>>,
    ) -> Result<RemoteObject, RemoteError> {
        match self.objects.get(parent) {
            Some(p) if p.meta.is_folder && !p.meta.trashed => {}
            _ => return Err(RemoteError::NotFound(parent.to_string())),
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let id = RemoteId::new(format!("obj-{seq}"))
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let is_folder = mime_type == Some(FOLDER_MIME_TYPE);
        let bytes = content.unwrap_or_default();

        let meta = RemoteObject {
            id: id.clone(),
            name: name.to_string(),
            parents: vec![parent.clone()],
            is_folder,
            mime_type: mime_type.map(str::to_string),
            md5: match (is_folder, mime_type) {
                (true, _) => None,
                (false, Some(m)) if m.starts_with(crate::remote::NATIVE_MIME_PREFIX) => None,
                _ => Some(md5_bytes(&bytes)),
            },
            modified: Some(Utc::now()),
            size: bytes.len() as u64,
            trashed: false,
        };

        self.record(&meta);
        self.objects.insert(
            id,
            Stored {
                seq,
                meta: meta.clone(),
                content: bytes,
            },
        );
        Ok(meta)
    }

    fn children_of(&self, parent: &RemoteId) -> Vec<RemoteId> {
        self.objects
            .values()
            .filter(|s| s.meta.has_parent(parent))
            .map(|s| s.meta.id.clone())
            .collect()
    }

    fn find_child(&self, parent: &RemoteId, name: &str, folder: Option<bool>) -> Option<&Stored> {
        self.objects
            .values()
            .filter(|s| {
                !s.meta.trashed
                    && s.meta.has_parent(parent)
                    && s.meta.name == name
                    && folder.map_or(true, |f| s.meta.is_folder == f)
            })
            .min_by_key(|s| s.seq)
    }
}

/// Remote object store and change feed held in memory
pub struct InMemoryRemote {
    state: Mutex<State>,
    root: RemoteId,
    page_size: usize,
    offline: AtomicBool,
    corrupt: AtomicBool,
    latency_ms: AtomicU64,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    /// Creates a store holding only its root folder
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let root = RemoteId::new(ROOT_ID).unwrap_or_else(|_| unreachable!("static id"));
        let mut objects = HashMap::new();
        objects.insert(
            root.clone(),
            Stored {
                seq: 0,
                meta: RemoteObject {
                    id: root.clone(),
                    name: String::new(),
                    parents: Vec::new(),
                    is_folder: true,
                    mime_type: Some(FOLDER_MIME_TYPE.to_string()),
                    md5: None,
                    modified: Some(Utc::now()),
                    size: 0,
                    trashed: false,
                },
                content: Vec::new(),
            },
        );

        Self {
            state: Mutex::new(State {
                objects,
                journal: Vec::new(),
                next_seq: 0,
            }),
            root,
            page_size: page_size.max(1),
            offline: AtomicBool::new(false),
            corrupt: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies the simulated latency and outage before a call
    async fn gate(&self) -> Result<(), RemoteError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::Relaxed) {
            return Err(RemoteError::Transport("remote unreachable".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Direct manipulation (simulates other clients of the store)
    // ========================================================================

    pub fn root_id(&self) -> RemoteId {
        self.root.clone()
    }

    /// Creates a folder; panics if the parent does not exist
    pub fn put_folder(&self, parent: &RemoteId, name: &str) -> RemoteObject {
        self.lock()
            .insert(parent, name, Some(FOLDER_MIME_TYPE), None)
            .unwrap_or_else(|e| panic!("put_folder {name}: {e}"))
    }

    /// Creates a file; panics if the parent does not exist
    pub fn put_file(&self, parent: &RemoteId, name: &str, bytes: &[u8]) -> RemoteObject {
        self.lock()
            .insert(parent, name, Some("application/octet-stream"), Some(bytes.to_vec()))
            .unwrap_or_else(|e| panic!("put_file {name}: {e}"))
    }

    /// Creates a native document that has no byte content
    pub fn put_native_document(&self, parent: &RemoteId, name: &str) -> RemoteObject {
        self.lock()
            .insert(
                parent,
                name,
                Some("application/vnd.google-apps.document"),
                None,
            )
            .unwrap_or_else(|e| panic!("put_native_document {name}: {e}"))
    }

    /// Replaces a file's content as another client would
    pub fn set_content(&self, id: &RemoteId, bytes: &[u8]) -> Option<RemoteObject> {
        let mut state = self.lock();
        let stored = state.objects.get_mut(id)?;
        stored.content = bytes.to_vec();
        stored.meta.md5 = Some(md5_bytes(bytes));
        stored.meta.size = bytes.len() as u64;
        stored.meta.modified = Some(Utc::now());
        let meta = stored.meta.clone();
        state.record(&meta);
        Some(meta)
    }

    /// Renames an object in place
    pub fn rename(&self, id: &RemoteId, name: &str) -> Option<RemoteObject> {
        let mut state = self.lock();
        let stored = state.objects.get_mut(id)?;
        stored.meta.name = name.to_string();
        stored.meta.modified = Some(Utc::now());
        let meta = stored.meta.clone();
        state.record(&meta);
        Some(meta)
    }

    /// Erases an object; the feed reports it as removed without a body
    pub fn remove_permanently(&self, id: &RemoteId) -> bool {
        let mut state = self.lock();
        if state.objects.remove(id).is_none() {
            return false;
        }
        state.journal.push(FeedChange {
            remote_id: id.clone(),
            removed: true,
            file: None,
            time: Some(Utc::now()),
        });
        true
    }

    pub fn content(&self, id: &RemoteId) -> Option<Vec<u8>> {
        self.lock().objects.get(id).map(|s| s.content.clone())
    }

    pub fn metadata_of(&self, id: &RemoteId) -> Option<RemoteObject> {
        self.lock().objects.get(id).map(|s| s.meta.clone())
    }

    /// Resolves a `/`-separated path of live objects from the root
    pub fn find_by_path(&self, path: &str) -> Option<RemoteObject> {
        let state = self.lock();
        let mut current = self.root.clone();
        let mut found = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let child = state.find_child(&current, segment, None)?;
            current = child.meta.id.clone();
            found = Some(child.meta.clone());
        }
        found
    }

    /// Live children of `parent` named `name`
    pub fn children_named(&self, parent: &RemoteId, name: &str) -> Vec<RemoteObject> {
        self.lock()
            .objects
            .values()
            .filter(|s| !s.meta.trashed && s.meta.has_parent(parent) && s.meta.name == name)
            .map(|s| s.meta.clone())
            .collect()
    }

    /// Number of objects, root and trashed included
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Number of journaled changes so far
    pub fn journal_len(&self) -> usize {
        self.lock().journal.len()
    }

    /// Makes every call fail with a transport error while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Appends a stray byte to downloaded content while set
    pub fn corrupt_downloads(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::Relaxed);
    }

    /// Delays every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }
}

#[async_trait::async_trait]
impl IRemoteObjectStore for InMemoryRemote {
    async fn find_child(
        &self,
        parent: &RemoteId,
        name: &str,
        folder: bool,
    ) -> Result<Option<RemoteObject>, RemoteError> {
        self.gate().await?;
        Ok(self
            .lock()
            .find_child(parent, name, Some(folder))
            .map(|s| s.meta.clone()))
    }

    async fn create_folder(
        &self,
        parent: &RemoteId,
        name: &str,
    ) -> Result<RemoteObject, RemoteError> {
        self.gate().await?;
        self.lock()
            .insert(parent, name, Some(FOLDER_MIME_TYPE), None)
    }

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        source: &Path,
    ) -> Result<RemoteObject, RemoteError> {
        self.gate().await?;
        let bytes = tokio::fs::read(source).await?;
        self.lock()
            .insert(parent, name, Some("application/octet-stream"), Some(bytes))
    }

    async fn update_file(
        &self,
        id: &RemoteId,
        source: &Path,
    ) -> Result<RemoteObject, RemoteError> {
        self.gate().await?;
        let bytes = tokio::fs::read(source).await?;

        let mut state = self.lock();
        let stored = match state.objects.get_mut(id) {
            Some(s) if !s.meta.trashed && !s.meta.is_folder => s,
            _ => return Err(RemoteError::NotFound(id.to_string())),
        };
        stored.meta.md5 = Some(md5_bytes(&bytes));
        stored.meta.size = bytes.len() as u64;
        stored.meta.modified = Some(Utc::now());
        stored.content = bytes;
        let meta = stored.meta.clone();
        state.record(&meta);
        Ok(meta)
    }

    async fn get_metadata(&self, id: &RemoteId) -> Result<RemoteObject, RemoteError> {
        self.gate().await?;
        self.metadata_of(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn download_to(&self, id: &RemoteId, dest: &Path) -> Result<(), RemoteError> {
        self.gate().await?;
        let mut bytes = {
            let state = self.lock();
            match state.objects.get(id) {
                Some(s) if !s.meta.trashed && !s.meta.is_folder => s.content.clone(),
                _ => return Err(RemoteError::NotFound(id.to_string())),
            }
        };
        if self.corrupt.load(Ordering::Relaxed) {
            bytes.push(b'!');
        }
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn trash(&self, id: &RemoteId) -> Result<(), RemoteError> {
        self.gate().await?;
        let mut state = self.lock();
        if !state.objects.contains_key(id) || id == &self.root {
            return Err(RemoteError::NotFound(id.to_string()));
        }

        let mut pending = vec![id.clone()];
        while let Some(current) = pending.pop() {
            pending.extend(state.children_of(&current));
            let meta = match state.objects.get_mut(&current) {
                Some(s) if !s.meta.trashed => {
                    s.meta.trashed = true;
                    s.meta.modified = Some(Utc::now());
                    s.meta.clone()
                }
                _ => continue,
            };
            state.record(&meta);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IRemoteChangeFeed for InMemoryRemote {
    async fn get_start_cursor(&self) -> Result<ChangeCursor, RemoteError> {
        self.gate().await?;
        let position = self.lock().journal.len();
        ChangeCursor::new(position.to_string()).map_err(|e| RemoteError::Transport(e.to_string()))
    }

    async fn list_changes_since(&self, cursor: &ChangeCursor) -> Result<ChangePage, RemoteError> {
        self.gate().await?;
        let state = self.lock();
        let start: usize = cursor
            .as_str()
            .parse()
            .ok()
            .filter(|&pos| pos <= state.journal.len())
            .ok_or_else(|| RemoteError::Transport(format!("invalid cursor: {cursor}")))?;

        let end = (start + self.page_size).min(state.journal.len());
        let next_cursor = ChangeCursor::new(end.to_string())
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(ChangePage {
            changes: state.journal[start..end].to_vec(),
            next_cursor,
            has_more: end < state.journal.len(),
        })
    }
}
