//! Subcommands of the `tandem` binary

pub mod add;
pub mod list;
pub mod logs;
pub mod pending;
pub mod remove;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use tandem_cache::{DatabasePool, SqliteStateStore};
use tandem_core::domain::SyncConfig;
use tandem_core::paths::expand_tilde;
use tandem_core::ports::ISyncStateStore;
use tandem_core::usecases::ManageConfigsUseCase;

/// Open state database plus the use case the commands work through
pub struct Session {
    pool: DatabasePool,
    pub configs: ManageConfigsUseCase,
}

impl Session {
    /// Opens (and migrates) the database at `db_path`
    ///
    /// # Errors
    /// Returns an error if the database cannot be created or opened
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = DatabasePool::new(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        let store: Arc<dyn ISyncStateStore> = Arc::new(SqliteStateStore::new(pool.pool().clone()));
        Ok(Self {
            pool,
            configs: ManageConfigsUseCase::new(store),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Turns a user-typed local path into the key configurations are stored under
///
/// Existing directories are canonicalized; a directory that is gone is
/// still made absolute so its binding can be removed.
pub fn lookup_path(input: &str) -> Result<PathBuf> {
    let expanded = expand_tilde(input);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .context("Cannot determine current directory")?
            .join(expanded)
    };
    Ok(std::fs::canonicalize(&absolute).unwrap_or(absolute))
}

pub fn config_json(config: &SyncConfig) -> serde_json::Value {
    serde_json::json!({
        "id": config.id().as_i64(),
        "local_path": config.local_path().display().to_string(),
        "remote_folder_id": config.remote_folder_id().as_str(),
        "remote_container_id": config.remote_container_id(),
        "created_at": config.created_at().to_rfc3339(),
        "last_sync_at": config.last_sync_at().map(|t| t.to_rfc3339()),
        "change_token": config.change_token().map(|c| c.as_str()),
    })
}

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_optional_time(at: Option<DateTime<Utc>>) -> String {
    at.map(format_time).unwrap_or_else(|| "never".to_string())
}
