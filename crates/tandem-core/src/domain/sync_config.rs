//! SyncConfig domain entity
//!
//! Binds one absolute local root to one remote folder. A configuration owns
//! its sync items and log entries; removing it removes them too.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ChangeCursor, ConfigId, RemoteId};

/// Values needed to register a new configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncConfig {
    local_path: PathBuf,
    remote_folder_id: RemoteId,
    remote_container_id: Option<String>,
}

impl NewSyncConfig {
    /// Creates a registration request
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidPath` if `local_path` is not absolute.
    pub fn new(
        local_path: PathBuf,
        remote_folder_id: RemoteId,
        remote_container_id: Option<String>,
    ) -> Result<Self, DomainError> {
        if !local_path.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Sync root must be absolute: {}",
                local_path.display()
            )));
        }

        Ok(Self {
            local_path,
            remote_folder_id,
            remote_container_id: remote_container_id.filter(|c| !c.is_empty()),
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_folder_id(&self) -> &RemoteId {
        &self.remote_folder_id
    }

    pub fn remote_container_id(&self) -> Option<&str> {
        self.remote_container_id.as_deref()
    }
}

/// A persisted local-root to remote-folder binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    id: ConfigId,
    local_path: PathBuf,
    remote_folder_id: RemoteId,
    /// Shared container (drive) holding the folder, if any
    remote_container_id: Option<String>,
    created_at: DateTime<Utc>,
    last_sync_at: Option<DateTime<Utc>>,
    /// Persisted position in the remote change feed
    change_token: Option<ChangeCursor>,
}

impl SyncConfig {
    /// Rebuilds a configuration from persisted fields
    pub fn restore(
        id: ConfigId,
        new: NewSyncConfig,
        created_at: DateTime<Utc>,
        last_sync_at: Option<DateTime<Utc>>,
        change_token: Option<ChangeCursor>,
    ) -> Self {
        Self {
            id,
            local_path: new.local_path,
            remote_folder_id: new.remote_folder_id,
            remote_container_id: new.remote_container_id,
            created_at,
            last_sync_at,
            change_token,
        }
    }

    pub fn id(&self) -> ConfigId {
        self.id
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_folder_id(&self) -> &RemoteId {
        &self.remote_folder_id
    }

    pub fn remote_container_id(&self) -> Option<&str> {
        self.remote_container_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at
    }

    pub fn change_token(&self) -> Option<&ChangeCursor> {
        self.change_token.as_ref()
    }

    /// Records a new change-feed position
    pub fn update_change_token(&mut self, token: ChangeCursor, at: DateTime<Utc>) {
        self.change_token = Some(token);
        self.last_sync_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_absolute_path() {
        let folder = RemoteId::new("F").unwrap();
        assert!(NewSyncConfig::new(PathBuf::from("relative"), folder.clone(), None).is_err());

        let new = NewSyncConfig::new(PathBuf::from("/sync"), folder, Some(String::new())).unwrap();
        assert_eq!(new.local_path(), Path::new("/sync"));
        assert!(new.remote_container_id().is_none());
    }

    #[test]
    fn test_update_change_token() {
        let new = NewSyncConfig::new(PathBuf::from("/sync"), RemoteId::new("F").unwrap(), None)
            .unwrap();
        let mut config = SyncConfig::restore(ConfigId::new(1), new, Utc::now(), None, None);
        assert!(config.change_token().is_none());

        let now = Utc::now();
        config.update_change_token(ChangeCursor::new("7").unwrap(), now);
        assert_eq!(config.change_token().unwrap().as_str(), "7");
        assert_eq!(config.last_sync_at(), Some(now));
    }
}
