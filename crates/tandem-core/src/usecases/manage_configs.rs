//! Sync configuration management use case
//!
//! Backs the administrative surface: binding a local directory to a remote
//! folder, removing that binding, and reading status, pending uploads and
//! the recent log of a configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::domain::{
    newtypes::RemoteId, NewSyncConfig, SyncConfig, SyncItem, SyncLogEntry, SyncStatus,
};
use crate::paths::resolve_sync_root;
use crate::ports::ISyncStateStore;

/// Recent log entries of one configuration
#[derive(Debug, Clone)]
pub struct ConfigLogs {
    pub config: SyncConfig,
    pub entries: Vec<SyncLogEntry>,
}

/// Use case for managing sync configurations
pub struct ManageConfigsUseCase {
    store: Arc<dyn ISyncStateStore>,
}

impl ManageConfigsUseCase {
    pub fn new(store: Arc<dyn ISyncStateStore>) -> Self {
        Self { store }
    }

    /// Binds a local directory to a remote folder
    ///
    /// The directory is created when missing; `~` and relative paths are
    /// resolved first.
    ///
    /// # Arguments
    ///
    /// * `local_path` - Local root as typed by the user
    /// * `remote_folder_id` - Id of the remote folder to mirror
    /// * `remote_container_id` - Optional shared container holding the folder
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a usable directory, the remote id
    /// is malformed, or the path is already bound.
    pub async fn register(
        &self,
        local_path: &str,
        remote_folder_id: &str,
        remote_container_id: Option<String>,
    ) -> Result<SyncConfig> {
        let folder = RemoteId::new(remote_folder_id)?;
        let local_path = resolve_sync_root(local_path)
            .with_context(|| format!("Invalid sync root: {local_path}"))?;
        let new = NewSyncConfig::new(local_path, folder, remote_container_id)?;

        if self.store.get_config(new.local_path()).await?.is_some() {
            bail!(
                "A sync configuration already exists for {}",
                new.local_path().display()
            );
        }

        let config = self
            .store
            .create_config(&new)
            .await
            .context("Failed to create sync configuration")?;

        info!(
            config_id = %config.id(),
            local_path = %config.local_path().display(),
            remote_folder_id = %config.remote_folder_id(),
            "Registered sync configuration"
        );
        Ok(config)
    }

    /// Removes the binding for `local_path` together with its items and log
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration is bound to the path.
    pub async fn unregister(&self, local_path: &Path) -> Result<()> {
        self.require(local_path).await?;
        self.store.remove_config(local_path).await?;
        info!(local_path = %local_path.display(), "Removed sync configuration");
        Ok(())
    }

    pub async fn find(&self, local_path: &Path) -> Result<Option<SyncConfig>> {
        self.store.get_config(local_path).await
    }

    pub async fn list(&self) -> Result<Vec<SyncConfig>> {
        self.store.list_configs().await
    }

    /// Status of one configuration, or of all of them when `local_path` is `None`
    pub async fn statuses(&self, local_path: Option<&Path>) -> Result<Vec<SyncStatus>> {
        match local_path {
            Some(path) => {
                let config = self.require(path).await?;
                Ok(vec![self.store.get_status(config.id()).await?])
            }
            None => self.store.list_statuses().await,
        }
    }

    /// Items of a configuration still waiting to be uploaded
    pub async fn pending_uploads(&self, local_path: &Path) -> Result<Vec<SyncItem>> {
        let config = self.require(local_path).await?;
        self.store.list_pending_uploads(config.id()).await
    }

    /// Most recent log entries of a configuration, newest first
    pub async fn recent_logs(&self, local_path: &Path, limit: u32) -> Result<ConfigLogs> {
        let config = self.require(local_path).await?;
        let entries = self.store.get_recent_logs(config.id(), limit).await?;
        Ok(ConfigLogs { config, entries })
    }

    async fn require(&self, local_path: &Path) -> Result<SyncConfig> {
        match self.store.get_config(local_path).await? {
            Some(config) => Ok(config),
            None => bail!(
                "No sync configuration found for {}",
                local_path.display()
            ),
        }
    }
}
