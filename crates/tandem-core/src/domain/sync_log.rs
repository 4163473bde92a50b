//! Sync log domain entities
//!
//! The sync log is the append-only, user-visible record of everything the
//! engine did for a configuration. Entries are never mutated or deleted
//! except when their configuration is removed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::DomainError;
use super::newtypes::{ConfigId, LogEntryId};

/// Actions that can be recorded in the sync log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Local file or folder pushed to the remote store
    Upload,
    /// Remote file pulled into the local tree
    Download,
    /// Local deletion propagated to the remote store
    Delete,
    /// Remote deletion propagated to the local tree
    DownloadDelete,
    /// A conflict was detected and resolved by policy
    Conflict,
    /// An operation failed
    Error,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Upload => "upload",
            SyncAction::Download => "download",
            SyncAction::Delete => "delete",
            SyncAction::DownloadDelete => "download_delete",
            SyncAction::Conflict => "conflict",
            SyncAction::Error => "error",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(SyncAction::Upload),
            "download" => Ok(SyncAction::Download),
            "delete" => Ok(SyncAction::Delete),
            "download_delete" => Ok(SyncAction::DownloadDelete),
            "conflict" => Ok(SyncAction::Conflict),
            "error" => Ok(SyncAction::Error),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown sync action: {other}"
            ))),
        }
    }
}

/// A log entry about to be appended
///
/// `path` is relative to the configuration root and may be empty for
/// entries that are not about a single file (watcher or poller failures).
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncLogEntry {
    config_id: ConfigId,
    action: SyncAction,
    path: String,
    details: Map<String, Value>,
}

impl NewSyncLogEntry {
    pub fn new(config_id: ConfigId, action: SyncAction, path: impl Into<String>) -> Self {
        Self {
            config_id,
            action,
            path: path.into(),
            details: Map::new(),
        }
    }

    /// Adds one key to the details object
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn config_id(&self) -> ConfigId {
        self.config_id
    }

    pub fn action(&self) -> SyncAction {
        self.action
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    /// Details serialized as a JSON object string
    pub fn details_json(&self) -> String {
        Value::Object(self.details.clone()).to_string()
    }
}

/// A persisted sync log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: LogEntryId,
    pub config_id: ConfigId,
    pub action: SyncAction,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl SyncLogEntry {
    /// Looks up a string detail
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}
