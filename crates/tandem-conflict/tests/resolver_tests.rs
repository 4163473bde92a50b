//! Resolver strategies against a real directory and a scripted remote

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use tandem_audit::SyncLogger;
use tandem_cache::{DatabasePool, SqliteStateStore};
use tandem_conflict::{ConflictDetector, ConflictError, ConflictResolver};
use tandem_core::domain::{
    newtypes::{ConfigId, RelativePath, RemoteId},
    ConflictInfo, ConflictStrategy, NewSyncConfig, SyncAction, SyncItem,
};
use tandem_core::hashing::md5_bytes;
use tandem_core::ports::{
    DownloadOutcome, IRemoteContentStore, ISyncStateStore, RemoteError, RemoteObject,
    UploadOutcome,
};

/// Remote that serves fixed contents by id and records uploads
struct ScriptedRemote {
    root: PathBuf,
    contents: HashMap<String, (String, Vec<u8>)>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedRemote {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            contents: HashMap::new(),
            uploads: Mutex::new(Vec::new()),
        }
    }

    fn with_file(mut self, id: &str, rel_path: &str, bytes: &[u8]) -> Self {
        self.contents
            .insert(id.to_string(), (rel_path.to_string(), bytes.to_vec()));
        self
    }
}

#[async_trait]
impl IRemoteContentStore for ScriptedRemote {
    async fn upload(
        &self,
        rel_path: &RelativePath,
        local_abs_path: &Path,
    ) -> Result<UploadOutcome, RemoteError> {
        let bytes = std::fs::read(local_abs_path)?;
        let md5 = md5_bytes(&bytes);
        self.uploads
            .lock()
            .unwrap()
            .push((rel_path.to_string(), bytes));
        Ok(UploadOutcome {
            remote_id: RemoteId::new("r1").unwrap(),
            md5,
            modified: Utc::now(),
        })
    }

    async fn download(
        &self,
        remote_id: &RemoteId,
        _suggested_name: &str,
    ) -> Result<DownloadOutcome, RemoteError> {
        let (rel, bytes) = self
            .contents
            .get(remote_id.as_str())
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
        let rel_path = RelativePath::new(rel.clone()).unwrap();
        std::fs::write(rel_path.to_local(&self.root), bytes)?;
        Ok(DownloadOutcome {
            rel_path,
            md5: md5_bytes(bytes),
        })
    }

    async fn create_folder(&self, _rel_path: &RelativePath) -> Result<RemoteId, RemoteError> {
        Err(RemoteError::Unsupported("folders".into()))
    }

    async fn delete(&self, _rel_path: &RelativePath) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn metadata(&self, remote_id: &RemoteId) -> Result<RemoteObject, RemoteError> {
        Err(RemoteError::NotFound(remote_id.to_string()))
    }
}

struct Fixture {
    dir: TempDir,
    store: Arc<SqliteStateStore>,
    config_id: ConfigId,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let pool = DatabasePool::in_memory().await.unwrap();
    let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));
    let config = store
        .create_config(
            &NewSyncConfig::new(dir.path().to_path_buf(), RemoteId::new("F").unwrap(), None)
                .unwrap(),
        )
        .await
        .unwrap();
    Fixture {
        dir,
        store,
        config_id: config.id(),
    }
}

impl Fixture {
    fn resolver(&self, remote: ScriptedRemote, strategy: ConflictStrategy) -> ConflictResolver {
        ConflictResolver::new(
            Arc::new(remote),
            SyncLogger::new(self.store.clone(), self.config_id),
            self.dir.path().to_path_buf(),
            strategy,
        )
    }

    /// Baseline "hello" on both sides, local now "bonjour", remote "world"
    async fn conflict(&self) -> ConflictInfo {
        let base = md5_bytes(b"hello");
        let mut item = SyncItem::new_local(
            self.config_id,
            RelativePath::new("a.txt").unwrap(),
            base.clone(),
            None,
        );
        item.record_sync(RemoteId::new("r1").unwrap(), base.clone(), base, None, None)
            .unwrap();

        let abs = self.dir.path().join("a.txt");
        std::fs::write(&abs, b"bonjour").unwrap();
        ConflictDetector::detect(&item, &abs, md5_bytes(b"world"), Some(Utc::now()))
            .await
            .unwrap()
            .unwrap()
    }

    fn entries_in_dir(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

#[tokio::test]
async fn test_rename_keeps_both_versions() {
    let fx = fixture().await;
    let info = fx.conflict().await;
    assert!(info.is_conflict());

    let remote = ScriptedRemote::new(fx.dir.path()).with_file("r1", "a.txt", b"world");
    let outcome = fx
        .resolver(remote, ConflictStrategy::Rename)
        .resolve(&info)
        .await
        .unwrap();

    let renamed = outcome.renamed_to.clone().unwrap();
    assert!(renamed.as_str().starts_with("a.conflict-"));
    assert!(renamed.as_str().ends_with(".txt"));
    assert!(outcome.download_remote);
    assert!(!outcome.upload_local);
    assert_eq!(outcome.md5, md5_bytes(b"world"));

    assert_eq!(
        std::fs::read(renamed.to_local(fx.dir.path())).unwrap(),
        b"bonjour"
    );
    assert_eq!(std::fs::read(fx.dir.path().join("a.txt")).unwrap(), b"world");
    assert_eq!(fx.entries_in_dir().len(), 2);

    let logs = fx.store.get_recent_logs(fx.config_id, 5).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, SyncAction::Conflict);
    assert_eq!(logs[0].detail_str("strategy"), Some("rename"));
    assert_eq!(logs[0].detail_str("renamed_to"), Some(renamed.as_str()));
}

#[tokio::test]
async fn test_local_wins_uploads_local_content() {
    let fx = fixture().await;
    let info = fx.conflict().await;

    let remote = Arc::new(ScriptedRemote::new(fx.dir.path()));
    let resolver = ConflictResolver::new(
        remote.clone(),
        SyncLogger::new(fx.store.clone(), fx.config_id),
        fx.dir.path().to_path_buf(),
        ConflictStrategy::LocalWins,
    );
    let outcome = resolver.resolve(&info).await.unwrap();

    assert!(outcome.upload_local);
    assert!(outcome.renamed_to.is_none());
    assert_eq!(outcome.md5, md5_bytes(b"bonjour"));
    let uploads = remote.uploads.lock().unwrap().clone();
    assert_eq!(uploads, vec![("a.txt".to_string(), b"bonjour".to_vec())]);
    assert_eq!(fx.entries_in_dir(), vec!["a.txt"]);

    let logs = fx.store.get_recent_logs(fx.config_id, 5).await.unwrap();
    assert_eq!(logs[0].detail_str("strategy"), Some("local-wins"));
}

#[tokio::test]
async fn test_remote_wins_overwrites_local() {
    let fx = fixture().await;
    let info = fx.conflict().await;

    let remote = ScriptedRemote::new(fx.dir.path()).with_file("r1", "a.txt", b"world");
    let outcome = fx
        .resolver(remote, ConflictStrategy::RemoteWins)
        .resolve(&info)
        .await
        .unwrap();

    assert!(outcome.download_remote);
    assert_eq!(std::fs::read(fx.dir.path().join("a.txt")).unwrap(), b"world");
    assert_eq!(fx.entries_in_dir(), vec!["a.txt"]);
}

#[tokio::test]
async fn test_failed_download_surfaces_error_and_logs_nothing() {
    let fx = fixture().await;
    let info = fx.conflict().await;

    // Remote has no content for r1
    let remote = ScriptedRemote::new(fx.dir.path());
    let err = fx
        .resolver(remote, ConflictStrategy::RemoteWins)
        .resolve(&info)
        .await
        .unwrap_err();
    assert!(matches!(err, ConflictError::Remote(RemoteError::NotFound(_))));

    let logs = fx.store.get_recent_logs(fx.config_id, 5).await.unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_rename_of_missing_file_fails() {
    let fx = fixture().await;
    let info = fx.conflict().await;
    std::fs::remove_file(fx.dir.path().join("a.txt")).unwrap();

    let remote = ScriptedRemote::new(fx.dir.path()).with_file("r1", "a.txt", b"world");
    let err = fx
        .resolver(remote, ConflictStrategy::Rename)
        .resolve(&info)
        .await
        .unwrap_err();
    assert!(matches!(err, ConflictError::RenameFailed { .. }));
}

#[tokio::test]
async fn test_rename_restores_local_when_download_fails() {
    let fx = fixture().await;
    let info = fx.conflict().await;

    // Remote has no content for r1
    let remote = ScriptedRemote::new(fx.dir.path());
    let err = fx
        .resolver(remote, ConflictStrategy::Rename)
        .resolve(&info)
        .await
        .unwrap_err();
    assert!(matches!(err, ConflictError::Remote(RemoteError::NotFound(_))));

    assert_eq!(fx.entries_in_dir(), vec!["a.txt"]);
    assert_eq!(std::fs::read(fx.dir.path().join("a.txt")).unwrap(), b"bonjour");
    assert!(fx.store.get_recent_logs(fx.config_id, 5).await.unwrap().is_empty());
}
