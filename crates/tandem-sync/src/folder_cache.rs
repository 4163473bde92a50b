//! Per-configuration cache of resolved remote folder ids
//!
//! Keys are root-relative directory paths; the empty key is the watched
//! root folder itself. One cache belongs to exactly one configuration.

use dashmap::DashMap;

use tandem_core::domain::newtypes::{RelativePath, RemoteId};

/// Relative directory path -> remote folder id
#[derive(Debug)]
pub struct FolderCache {
    root: RemoteId,
    by_path: DashMap<String, RemoteId>,
}

impl FolderCache {
    /// Creates a cache seeded with the watched root folder
    pub fn new(root: RemoteId) -> Self {
        Self {
            root,
            by_path: DashMap::new(),
        }
    }

    /// The watched root folder id
    pub fn root(&self) -> &RemoteId {
        &self.root
    }

    /// Looks up a directory; `None` resolves to the root
    pub fn get(&self, dir: Option<&RelativePath>) -> Option<RemoteId> {
        match dir {
            None => Some(self.root.clone()),
            Some(path) => self.by_path.get(path.as_str()).map(|r| r.value().clone()),
        }
    }

    pub fn insert(&self, dir: &RelativePath, id: RemoteId) {
        self.by_path.insert(dir.as_str().to_string(), id);
    }

    /// Drops `dir` and every cached directory beneath it
    pub fn evict_tree(&self, dir: &RelativePath) {
        self.by_path.retain(|key, _| {
            RelativePath::new(key.as_str())
                .map(|cached| !cached.starts_with(dir))
                .unwrap_or(false)
        });
    }

    /// Whether `id` is the root or a cached folder
    pub fn contains_id(&self, id: &RemoteId) -> bool {
        id == &self.root || self.by_path.iter().any(|r| r.value() == id)
    }

    /// Reverse lookup: the directory path cached for a folder id
    pub fn path_of(&self, id: &RemoteId) -> Option<RelativePath> {
        if id == &self.root {
            return None;
        }
        self.by_path
            .iter()
            .find(|r| r.value() == id)
            .and_then(|r| RelativePath::new(r.key().as_str()).ok())
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
