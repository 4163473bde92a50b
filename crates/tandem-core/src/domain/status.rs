//! Derived per-configuration status

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::sync_config::SyncConfig;
use super::sync_item::SyncState;

/// Item counts for one configuration, computed on demand and never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub config: SyncConfig,
    pub total_items: u64,
    pub synced_items: u64,
    /// pending_upload plus pending_download
    pub pending_items: u64,
    pub conflict_items: u64,
    pub error_items: u64,
}

impl SyncStatus {
    /// Folds per-state counts into the summary
    pub fn from_counts(config: SyncConfig, counts: &HashMap<SyncState, u64>) -> Self {
        let count = |state: SyncState| counts.get(&state).copied().unwrap_or(0);

        Self {
            config,
            total_items: counts.values().sum(),
            synced_items: count(SyncState::Synced),
            pending_items: count(SyncState::PendingUpload) + count(SyncState::PendingDownload),
            conflict_items: count(SyncState::Conflict),
            error_items: count(SyncState::Error),
        }
    }

    /// True when every tracked item is synced
    pub fn is_clean(&self) -> bool {
        self.total_items == self.synced_items
    }
}
