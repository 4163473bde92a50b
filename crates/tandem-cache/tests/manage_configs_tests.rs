//! ManageConfigsUseCase against the SQLite store

use std::sync::Arc;

use tandem_cache::{DatabasePool, SqliteStateStore};
use tandem_core::domain::{newtypes::ContentHash, NewSyncLogEntry, SyncAction, SyncItem};
use tandem_core::domain::newtypes::RelativePath;
use tandem_core::ports::ISyncStateStore;
use tandem_core::usecases::ManageConfigsUseCase;
use tempfile::TempDir;

async fn setup() -> (Arc<SqliteStateStore>, ManageConfigsUseCase) {
    let pool = DatabasePool::in_memory().await.unwrap();
    let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));
    let use_case = ManageConfigsUseCase::new(store.clone());
    (store, use_case)
}

#[tokio::test]
async fn test_register_creates_missing_directory() {
    let (_store, use_case) = setup().await;
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("Sync");

    let config = use_case
        .register(root.to_str().unwrap(), "folder-1", None)
        .await
        .unwrap();

    assert!(root.is_dir());
    assert_eq!(config.local_path(), root.canonicalize().unwrap());
    assert_eq!(use_case.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_twice_fails() {
    let (_store, use_case) = setup().await;
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_str().unwrap();

    use_case.register(root, "folder-1", None).await.unwrap();
    let err = use_case.register(root, "folder-2", None).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn test_register_rejects_file_and_bad_remote_id() {
    let (_store, use_case) = setup().await;
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("file.txt");
    std::fs::write(&file, b"x").unwrap();

    assert!(use_case
        .register(file.to_str().unwrap(), "folder-1", None)
        .await
        .is_err());
    assert!(use_case
        .register(dir.path().to_str().unwrap(), "bad id", None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_unregister_and_inspection() {
    let (store, use_case) = setup().await;
    let dir = TempDir::new().unwrap();
    let config = use_case
        .register(dir.path().to_str().unwrap(), "folder-1", None)
        .await
        .unwrap();
    let root = config.local_path().to_path_buf();

    store
        .save_item(&SyncItem::new_local(
            config.id(),
            RelativePath::new("a.txt").unwrap(),
            ContentHash::new("5d41402abc4b2a76b9719d911017c592").unwrap(),
            None,
        ))
        .await
        .unwrap();
    store
        .add_log_entry(&NewSyncLogEntry::new(config.id(), SyncAction::Upload, "a.txt"))
        .await
        .unwrap();

    assert_eq!(use_case.pending_uploads(&root).await.unwrap().len(), 1);
    let statuses = use_case.statuses(Some(&root)).await.unwrap();
    assert_eq!(statuses[0].pending_items, 1);
    let logs = use_case.recent_logs(&root, 20).await.unwrap();
    assert_eq!(logs.entries.len(), 1);

    use_case.unregister(&root).await.unwrap();
    assert!(use_case.find(&root).await.unwrap().is_none());
    assert!(use_case.unregister(&root).await.is_err());
    assert!(use_case.statuses(Some(&root)).await.is_err());
}
