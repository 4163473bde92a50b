//! Sync state store port (driven/secondary port)
//!
//! This module defines the interface for persisting configurations, sync
//! items and the append-only sync log.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   and don't need domain-level classification.
//! - Items are keyed by `(config_id, local_path)`; `(config_id, remote_id)`
//!   is a secondary lookup.
//! - Only the engine owning a configuration mutates its items, so the store
//!   does not need item-level locking.

use std::path::Path;

use crate::domain::{
    newtypes::{ChangeCursor, ConfigId, RelativePath, RemoteId},
    NewSyncConfig, NewSyncLogEntry, SyncConfig, SyncItem, SyncLogEntry, SyncState, SyncStatus,
};

/// Port for durable sync state
#[async_trait::async_trait]
pub trait ISyncStateStore: Send + Sync {
    // --- SyncConfig operations ---

    /// Registers a configuration; fails if the local path is already bound
    async fn create_config(&self, config: &NewSyncConfig) -> anyhow::Result<SyncConfig>;

    /// Finds the configuration bound to an absolute local path
    async fn get_config(&self, local_path: &Path) -> anyhow::Result<Option<SyncConfig>>;

    async fn get_config_by_id(&self, id: ConfigId) -> anyhow::Result<Option<SyncConfig>>;

    /// All configurations, newest first
    async fn list_configs(&self) -> anyhow::Result<Vec<SyncConfig>>;

    /// Removes a configuration with its items and log
    ///
    /// Fails if no configuration is bound to `local_path`.
    async fn remove_config(&self, local_path: &Path) -> anyhow::Result<()>;

    /// Persists the change-feed cursor and stamps `last_sync_at`
    async fn update_change_token(&self, id: ConfigId, token: &ChangeCursor)
        -> anyhow::Result<()>;

    // --- Status ---

    /// Item counts for one configuration; fails if it does not exist
    async fn get_status(&self, id: ConfigId) -> anyhow::Result<SyncStatus>;

    async fn list_statuses(&self) -> anyhow::Result<Vec<SyncStatus>>;

    // --- SyncItem operations ---

    /// Inserts or updates an item keyed by `(config_id, local_path)`
    ///
    /// Returns the stored item with its row id assigned.
    async fn save_item(&self, item: &SyncItem) -> anyhow::Result<SyncItem>;

    async fn get_item(
        &self,
        config_id: ConfigId,
        local_path: &RelativePath,
    ) -> anyhow::Result<Option<SyncItem>>;

    async fn get_item_by_remote_id(
        &self,
        config_id: ConfigId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<SyncItem>>;

    /// Items of one configuration in the given state, ordered by path
    async fn list_items_by_state(
        &self,
        config_id: ConfigId,
        state: SyncState,
    ) -> anyhow::Result<Vec<SyncItem>>;

    /// Items awaiting upload
    async fn list_pending_uploads(&self, config_id: ConfigId) -> anyhow::Result<Vec<SyncItem>> {
        self.list_items_by_state(config_id, SyncState::PendingUpload)
            .await
    }

    /// Removes an item; absent items are ignored
    async fn remove_item(&self, config_id: ConfigId, local_path: &RelativePath)
        -> anyhow::Result<()>;

    // --- Sync log ---

    /// Appends a log entry
    async fn add_log_entry(&self, entry: &NewSyncLogEntry) -> anyhow::Result<()>;

    /// Most recent entries first
    async fn get_recent_logs(
        &self,
        config_id: ConfigId,
        limit: u32,
    ) -> anyhow::Result<Vec<SyncLogEntry>>;
}
