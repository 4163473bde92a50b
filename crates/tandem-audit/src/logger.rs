//! SyncLogger - writers for the append-only sync log
//!
//! Wraps `ISyncStateStore::add_log_entry()` with one method per log action.
//! All methods are non-fatal: errors in log persistence are reported via
//! `tracing::warn!` but never propagated.

use std::fmt::Display;
use std::sync::Arc;

use tandem_core::{
    domain::{
        newtypes::{ConfigId, ContentHash, RelativePath, RemoteId},
        ConflictStrategy, NewSyncLogEntry, SyncAction,
    },
    ports::ISyncStateStore,
};

use crate::reason::{ErrorSource, FailedAction};

/// Sync log writer bound to one configuration
///
/// All methods silently swallow store errors (logging a warning) so that a
/// failing log write never breaks synchronization.
#[derive(Clone)]
pub struct SyncLogger {
    store: Arc<dyn ISyncStateStore>,
    config_id: ConfigId,
}

impl SyncLogger {
    /// Creates a logger writing entries for `config_id`
    pub fn new(store: Arc<dyn ISyncStateStore>, config_id: ConfigId) -> Self {
        Self { store, config_id }
    }

    pub fn config_id(&self) -> ConfigId {
        self.config_id
    }

    /// Persist an entry, swallowing errors with a tracing warning.
    async fn save(&self, entry: NewSyncLogEntry) {
        if let Err(e) = self.store.add_log_entry(&entry).await {
            tracing::warn!(
                config_id = %self.config_id,
                action = %entry.action(),
                path = %entry.path(),
                error = %e,
                "Failed to save sync log entry"
            );
        }
    }

    fn entry(&self, action: SyncAction, path: &str) -> NewSyncLogEntry {
        NewSyncLogEntry::new(self.config_id, action, path)
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// A local file was pushed to the remote store.
    pub async fn log_upload(&self, path: &RelativePath, remote_id: &RemoteId, md5: &ContentHash) {
        let entry = self
            .entry(SyncAction::Upload, path.as_str())
            .with_detail("remote_id", remote_id.as_str())
            .with_detail("md5", md5.as_str());
        self.save(entry).await;
    }

    /// A local directory was mirrored as a remote folder.
    pub async fn log_folder_upload(&self, path: &RelativePath, remote_id: &RemoteId) {
        let entry = self
            .entry(SyncAction::Upload, path.as_str())
            .with_detail("remote_id", remote_id.as_str())
            .with_detail("type", "folder");
        self.save(entry).await;
    }

    /// Remote content was written to the local tree.
    pub async fn log_download(&self, path: &RelativePath, remote_id: &RemoteId, md5: &ContentHash) {
        let entry = self
            .entry(SyncAction::Download, path.as_str())
            .with_detail("remote_id", remote_id.as_str())
            .with_detail("md5", md5.as_str());
        self.save(entry).await;
    }

    // ========================================================================
    // Deletions
    // ========================================================================

    /// A local deletion was propagated to the remote store (trash).
    pub async fn log_delete(&self, path: &RelativePath, remote_id: Option<&RemoteId>) {
        let mut entry = self.entry(SyncAction::Delete, path.as_str());
        if let Some(id) = remote_id {
            entry = entry.with_detail("remote_id", id.as_str());
        }
        self.save(entry).await;
    }

    /// A remote deletion was applied to the local tree.
    pub async fn log_download_delete(&self, path: &RelativePath, remote_id: &RemoteId) {
        let entry = self
            .entry(SyncAction::DownloadDelete, path.as_str())
            .with_detail("remote_id", remote_id.as_str());
        self.save(entry).await;
    }

    // ========================================================================
    // Conflicts and errors
    // ========================================================================

    /// A conflict was resolved with `strategy`.
    ///
    /// Written for every resolution so auto-resolved conflicts stay auditable.
    pub async fn log_conflict(
        &self,
        path: &RelativePath,
        strategy: ConflictStrategy,
        renamed_to: Option<&RelativePath>,
        local_md5: &ContentHash,
        remote_md5: &ContentHash,
    ) {
        let mut entry = self
            .entry(SyncAction::Conflict, path.as_str())
            .with_detail("strategy", strategy.as_str())
            .with_detail("local_md5", local_md5.as_str())
            .with_detail("remote_md5", remote_md5.as_str());
        if let Some(renamed) = renamed_to {
            entry = entry.with_detail("renamed_to", renamed.as_str());
        }
        self.save(entry).await;
    }

    /// A per-item operation failed.
    pub async fn log_error(&self, path: &str, action: FailedAction, error: &(dyn Display + Sync)) {
        let entry = self
            .entry(SyncAction::Error, path)
            .with_detail("action", action.as_str())
            .with_detail("error", error.to_string());
        self.save(entry).await;
    }

    /// Same as [`log_error`](Self::log_error) with the remote id involved.
    pub async fn log_remote_error(
        &self,
        path: &str,
        action: FailedAction,
        remote_id: &RemoteId,
        error: &(dyn Display + Sync),
    ) {
        let entry = self
            .entry(SyncAction::Error, path)
            .with_detail("action", action.as_str())
            .with_detail("remote_id", remote_id.as_str())
            .with_detail("error", error.to_string());
        self.save(entry).await;
    }

    /// A background producer reported a failure not tied to one path.
    pub async fn log_source_error(&self, source: ErrorSource, error: &(dyn Display + Sync)) {
        let entry = self
            .entry(SyncAction::Error, "")
            .with_detail("source", source.to_string())
            .with_detail("error", error.to_string());
        self.save(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    use tandem_core::domain::{
        newtypes::ChangeCursor, NewSyncConfig, SyncConfig, SyncItem, SyncLogEntry, SyncState,
        SyncStatus,
    };

    /// In-memory mock store that records appended log entries
    struct MockStore {
        entries: Mutex<Vec<NewSyncLogEntry>>,
        fail: bool,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn entries(&self) -> Vec<NewSyncLogEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ISyncStateStore for MockStore {
        async fn create_config(&self, _c: &NewSyncConfig) -> anyhow::Result<SyncConfig> {
            anyhow::bail!("unused")
        }
        async fn get_config(&self, _p: &Path) -> anyhow::Result<Option<SyncConfig>> {
            Ok(None)
        }
        async fn get_config_by_id(&self, _id: ConfigId) -> anyhow::Result<Option<SyncConfig>> {
            Ok(None)
        }
        async fn list_configs(&self) -> anyhow::Result<Vec<SyncConfig>> {
            Ok(vec![])
        }
        async fn remove_config(&self, _p: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        async fn update_change_token(
            &self,
            _id: ConfigId,
            _t: &ChangeCursor,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_status(&self, _id: ConfigId) -> anyhow::Result<SyncStatus> {
            anyhow::bail!("unused")
        }
        async fn list_statuses(&self) -> anyhow::Result<Vec<SyncStatus>> {
            Ok(vec![])
        }
        async fn save_item(&self, item: &SyncItem) -> anyhow::Result<SyncItem> {
            Ok(item.clone())
        }
        async fn get_item(
            &self,
            _c: ConfigId,
            _p: &RelativePath,
        ) -> anyhow::Result<Option<SyncItem>> {
            Ok(None)
        }
        async fn get_item_by_remote_id(
            &self,
            _c: ConfigId,
            _r: &RemoteId,
        ) -> anyhow::Result<Option<SyncItem>> {
            Ok(None)
        }
        async fn list_items_by_state(
            &self,
            _c: ConfigId,
            _s: SyncState,
        ) -> anyhow::Result<Vec<SyncItem>> {
            Ok(vec![])
        }
        async fn remove_item(&self, _c: ConfigId, _p: &RelativePath) -> anyhow::Result<()> {
            Ok(())
        }
        async fn add_log_entry(&self, entry: &NewSyncLogEntry) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
        async fn get_recent_logs(
            &self,
            _c: ConfigId,
            _limit: u32,
        ) -> anyhow::Result<Vec<SyncLogEntry>> {
            Ok(vec![])
        }
    }

    fn logger(store: &Arc<MockStore>) -> SyncLogger {
        SyncLogger::new(store.clone(), ConfigId::new(7))
    }

    fn path(p: &str) -> RelativePath {
        RelativePath::new(p).unwrap()
    }

    fn rid(r: &str) -> RemoteId {
        RemoteId::new(r).unwrap()
    }

    fn md5(h: &str) -> ContentHash {
        ContentHash::new(h).unwrap()
    }

    const HASH_A: &str = "5d41402abc4b2a76b9719d911017c592";
    const HASH_B: &str = "7d793037a0760186574b0282f2f435e7";

    #[tokio::test]
    async fn test_log_upload() {
        let store = Arc::new(MockStore::new());
        logger(&store)
            .log_upload(&path("docs/a.txt"), &rid("r1"), &md5(HASH_A))
            .await;

        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].config_id(), ConfigId::new(7));
        assert_eq!(entries[0].action(), SyncAction::Upload);
        assert_eq!(entries[0].path(), "docs/a.txt");
        assert_eq!(entries[0].details()["remote_id"], "r1");
        assert_eq!(entries[0].details()["md5"], HASH_A);
    }

    #[tokio::test]
    async fn test_log_folder_upload() {
        let store = Arc::new(MockStore::new());
        logger(&store).log_folder_upload(&path("docs"), &rid("f1")).await;

        let entries = store.entries();
        assert_eq!(entries[0].action(), SyncAction::Upload);
        assert_eq!(entries[0].details()["type"], "folder");
    }

    #[tokio::test]
    async fn test_log_download_and_deletes() {
        let store = Arc::new(MockStore::new());
        let log = logger(&store);
        log.log_download(&path("a.txt"), &rid("r1"), &md5(HASH_A)).await;
        log.log_delete(&path("b.txt"), None).await;
        log.log_download_delete(&path("c.txt"), &rid("r3")).await;

        let actions: Vec<SyncAction> = store.entries().iter().map(|e| e.action()).collect();
        assert_eq!(
            actions,
            vec![
                SyncAction::Download,
                SyncAction::Delete,
                SyncAction::DownloadDelete
            ]
        );
        assert!(!store.entries()[1].details().contains_key("remote_id"));
    }

    #[tokio::test]
    async fn test_log_conflict_details() {
        let store = Arc::new(MockStore::new());
        logger(&store)
            .log_conflict(
                &path("a.txt"),
                ConflictStrategy::Rename,
                Some(&path("a.conflict-2026-01-01-000000.txt")),
                &md5(HASH_A),
                &md5(HASH_B),
            )
            .await;

        let entry = &store.entries()[0];
        assert_eq!(entry.action(), SyncAction::Conflict);
        assert_eq!(entry.details()["strategy"], "rename");
        assert_eq!(
            entry.details()["renamed_to"],
            "a.conflict-2026-01-01-000000.txt"
        );
        assert_eq!(entry.details()["local_md5"], HASH_A);
        assert_eq!(entry.details()["remote_md5"], HASH_B);
    }

    #[tokio::test]
    async fn test_log_errors() {
        let store = Arc::new(MockStore::new());
        let log = logger(&store);
        log.log_error("a.txt", FailedAction::Upload, &"connection reset")
            .await;
        log.log_remote_error("b.txt", FailedAction::Download, &rid("r2"), &"timeout")
            .await;
        log.log_source_error(ErrorSource::Poller, &"unauthorized").await;

        let entries = store.entries();
        assert!(entries.iter().all(|e| e.action() == SyncAction::Error));
        assert_eq!(entries[0].details()["action"], "upload");
        assert_eq!(entries[0].details()["error"], "connection reset");
        assert_eq!(entries[1].details()["remote_id"], "r2");
        assert_eq!(entries[2].path(), "");
        assert_eq!(entries[2].details()["source"], "poller");
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let store = Arc::new(MockStore::failing());
        logger(&store)
            .log_upload(&path("a.txt"), &rid("r1"), &md5(HASH_A))
            .await;
        assert!(store.entries().is_empty());
    }
}
