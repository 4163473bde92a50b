//! Reason codes for sync log error entries
//!
//! Every `error` entry names the operation that failed, and producer
//! failures name their source, so a post-mortem can filter by either.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedAction {
    /// Uploading a local file
    Upload,
    /// Creating or locating a remote folder
    CreateFolder,
    /// Trashing the remote copy of a locally deleted path
    Delete,
    /// Trashing the remote copy of a renamed path
    RenameDelete,
    /// Fetching remote content
    Download,
    /// Removing a local file after a remote deletion
    LocalDelete,
    /// Persisting a sync item
    UpdateSyncItem,
    /// Dropping a sync item
    RemoveSyncItem,
    /// Retrying a pending upload from the sweep
    SweepUpload,
    /// Resolving a conflict
    Conflict,
    /// Reading local file state
    Stat,
}

impl FailedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailedAction::Upload => "upload",
            FailedAction::CreateFolder => "create_folder",
            FailedAction::Delete => "delete",
            FailedAction::RenameDelete => "rename_delete",
            FailedAction::Download => "download",
            FailedAction::LocalDelete => "local_delete",
            FailedAction::UpdateSyncItem => "update_sync_item",
            FailedAction::RemoveSyncItem => "remove_sync_item",
            FailedAction::SweepUpload => "sweep_upload",
            FailedAction::Conflict => "conflict",
            FailedAction::Stat => "stat",
        }
    }
}

impl fmt::Display for FailedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Background producer that reported a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Watcher,
    Poller,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSource::Watcher => "watcher",
            ErrorSource::Poller => "poller",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_action_display() {
        assert_eq!(FailedAction::Upload.to_string(), "upload");
        assert_eq!(FailedAction::RenameDelete.to_string(), "rename_delete");
        assert_eq!(FailedAction::UpdateSyncItem.to_string(), "update_sync_item");
        assert_eq!(FailedAction::SweepUpload.to_string(), "sweep_upload");
    }

    #[test]
    fn failed_action_serialization_matches_display() {
        let action = FailedAction::LocalDelete;
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, format!("\"{action}\""));

        let deserialized: FailedAction = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, action);
    }

    #[test]
    fn error_source_display() {
        assert_eq!(ErrorSource::Watcher.to_string(), "watcher");
        assert_eq!(ErrorSource::Poller.to_string(), "poller");
    }
}
