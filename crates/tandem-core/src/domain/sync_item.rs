//! SyncItem domain entity
//!
//! A SyncItem tracks one file inside a sync configuration. It carries the
//! content fingerprints recorded at the last successful reconciliation;
//! those baselines are what conflict detection diffs fresh hashes against.
//!
//! ## State Machine
//!
//! ```text
//!   new local file                                   new remote file
//!        │                                                  │
//!        ▼                                                  ▼
//! ┌────────────────┐   upload ok   ┌────────┐   download ok ┌──────────────────┐
//! │ pending_upload │ ────────────► │ synced │ ◄──────────── │ pending_download │
//! └────────────────┘ ◄──────────── └────────┘ ────────────► └──────────────────┘
//!        │            local changed     │     remote changed        │
//!        │                              │ both changed              │
//!        │                              ▼                           │
//!        │                        ┌──────────┐                      │
//!        └──────── error ───────► │ conflict │ ◄───── error ────────┘
//!                                 └──────────┘
//! ```
//!
//! Any state may end in removal once a deletion propagates; removal is not a
//! state, the store simply drops the row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ConfigId, ContentHash, ItemId, RelativePath, RemoteId};

// ============================================================================
// SyncState enum
// ============================================================================

/// Reconciliation state of a tracked file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local content must be pushed to the remote store
    #[default]
    PendingUpload,
    /// Remote content must be pulled to the local tree
    PendingDownload,
    /// Both sides match the recorded baseline
    Synced,
    /// Both sides changed since the last reconciliation
    Conflict,
    /// The last attempt failed; the item is retried later
    Error,
}

impl SyncState {
    /// Every state, in display order
    pub const ALL: [SyncState; 5] = [
        SyncState::PendingUpload,
        SyncState::PendingDownload,
        SyncState::Synced,
        SyncState::Conflict,
        SyncState::Error,
    ];

    /// Returns the persisted name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::PendingUpload => "pending_upload",
            SyncState::PendingDownload => "pending_download",
            SyncState::Synced => "synced",
            SyncState::Conflict => "conflict",
            SyncState::Error => "error",
        }
    }

    /// Returns true if work is queued in either direction
    pub fn is_pending(&self) -> bool {
        matches!(self, SyncState::PendingUpload | SyncState::PendingDownload)
    }

    /// Returns true if the item needs user attention
    pub fn needs_attention(&self) -> bool {
        matches!(self, SyncState::Conflict | SyncState::Error)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::ValidationFailed(format!("Unknown sync state: {s}")))
    }
}

// ============================================================================
// SyncItem struct
// ============================================================================

/// One tracked file within a sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Store row id (None until first persisted)
    id: Option<ItemId>,
    /// Owning configuration
    config_id: ConfigId,
    /// Path relative to the configuration's local root
    local_path: RelativePath,
    /// Remote object id (None until first uploaded)
    remote_id: Option<RemoteId>,
    /// Local fingerprint at the last reconciliation
    local_md5: Option<ContentHash>,
    /// Remote fingerprint at the last reconciliation
    remote_md5: Option<ContentHash>,
    local_mtime: Option<DateTime<Utc>>,
    remote_mtime: Option<DateTime<Utc>>,
    state: SyncState,
}

/// Raw field set used by stores to rebuild a persisted item
#[derive(Debug, Clone)]
pub struct SyncItemParts {
    pub id: ItemId,
    pub config_id: ConfigId,
    pub local_path: RelativePath,
    pub remote_id: Option<RemoteId>,
    pub local_md5: Option<ContentHash>,
    pub remote_md5: Option<ContentHash>,
    pub local_mtime: Option<DateTime<Utc>>,
    pub remote_mtime: Option<DateTime<Utc>>,
    pub state: SyncState,
}

impl SyncItem {
    /// Creates an item for a local file discovered before it was uploaded
    pub fn new_local(
        config_id: ConfigId,
        local_path: RelativePath,
        local_md5: ContentHash,
        local_mtime: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: None,
            config_id,
            local_path,
            remote_id: None,
            local_md5: Some(local_md5),
            remote_md5: None,
            local_mtime,
            remote_mtime: None,
            state: SyncState::PendingUpload,
        }
    }

    /// Creates an item for a remote file that has not been downloaded yet
    pub fn new_remote(
        config_id: ConfigId,
        local_path: RelativePath,
        remote_id: RemoteId,
        remote_md5: Option<ContentHash>,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: None,
            config_id,
            local_path,
            remote_id: Some(remote_id),
            local_md5: None,
            remote_md5,
            local_mtime: None,
            remote_mtime,
            state: SyncState::PendingDownload,
        }
    }

    /// Rebuilds an item from persisted fields without validation of the state
    pub fn from_parts(parts: SyncItemParts) -> Self {
        Self {
            id: Some(parts.id),
            config_id: parts.config_id,
            local_path: parts.local_path,
            remote_id: parts.remote_id,
            local_md5: parts.local_md5,
            remote_md5: parts.remote_md5,
            local_mtime: parts.local_mtime,
            remote_mtime: parts.remote_mtime,
            state: parts.state,
        }
    }

    // --- Getters ---

    pub fn id(&self) -> Option<ItemId> {
        self.id
    }

    pub fn config_id(&self) -> ConfigId {
        self.config_id
    }

    pub fn local_path(&self) -> &RelativePath {
        &self.local_path
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn local_md5(&self) -> Option<&ContentHash> {
        self.local_md5.as_ref()
    }

    pub fn remote_md5(&self) -> Option<&ContentHash> {
        self.remote_md5.as_ref()
    }

    pub fn local_mtime(&self) -> Option<DateTime<Utc>> {
        self.local_mtime
    }

    pub fn remote_mtime(&self) -> Option<DateTime<Utc>> {
        self.remote_mtime
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Returns true if both recorded fingerprints agree
    pub fn hashes_match(&self) -> bool {
        match (&self.local_md5, &self.remote_md5) {
            (Some(local), Some(remote)) => local == remote,
            _ => false,
        }
    }

    // --- Setters ---

    /// Assigns the store row id after an insert
    pub fn set_id(&mut self, id: ItemId) {
        self.id = Some(id);
    }
}

// ============================================================================
// State transition methods
// ============================================================================

impl SyncItem {
    /// Checks if a state transition is valid
    ///
    /// Valid transitions:
    /// - pending_upload -> synced, conflict, error
    /// - pending_download -> synced, conflict, error
    /// - synced -> pending_upload, pending_download, conflict
    /// - conflict -> synced, error
    /// - error -> any state (retry)
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        use SyncState::*;

        if self.state == Error {
            return true;
        }

        matches!(
            (self.state, target),
            (PendingUpload, Synced)
                | (PendingUpload, Conflict)
                | (PendingUpload, Error)
                | (PendingDownload, Synced)
                | (PendingDownload, Conflict)
                | (PendingDownload, Error)
                | (Synced, PendingUpload)
                | (Synced, PendingDownload)
                | (Synced, Conflict)
                | (Conflict, Synced)
                | (Conflict, Error)
        )
    }

    /// Attempts to transition to a new state
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` if the transition is not allowed.
    pub fn transition_to(&mut self, target: SyncState) -> Result<(), DomainError> {
        if !self.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        Ok(())
    }

    /// Local content changed since the baseline
    ///
    /// No-op when an upload is already pending.
    pub fn mark_local_changed(&mut self) -> Result<(), DomainError> {
        if self.state == SyncState::PendingUpload {
            return Ok(());
        }
        self.transition_to(SyncState::PendingUpload)
    }

    /// Remote content changed since the baseline
    ///
    /// No-op when a download is already pending.
    pub fn mark_remote_changed(&mut self) -> Result<(), DomainError> {
        if self.state == SyncState::PendingDownload {
            return Ok(());
        }
        self.transition_to(SyncState::PendingDownload)
    }

    /// Both sides diverged from the baseline
    pub fn mark_conflicted(&mut self) -> Result<(), DomainError> {
        if self.state == SyncState::Conflict {
            return Ok(());
        }
        self.transition_to(SyncState::Conflict)
    }

    /// The last attempt failed
    pub fn mark_error(&mut self) -> Result<(), DomainError> {
        if self.state == SyncState::Error {
            return Ok(());
        }
        self.transition_to(SyncState::Error)
    }

    /// Records a successful reconciliation and moves to `synced`
    ///
    /// The recorded fingerprints become the new baseline. An item that is
    /// already synced simply gets its baseline refreshed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` if the current state cannot reach `synced`.
    pub fn record_sync(
        &mut self,
        remote_id: RemoteId,
        local_md5: ContentHash,
        remote_md5: ContentHash,
        local_mtime: Option<DateTime<Utc>>,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Result<(), DomainError> {
        if self.state != SyncState::Synced {
            self.transition_to(SyncState::Synced)?;
        }
        self.remote_id = Some(remote_id);
        self.local_md5 = Some(local_md5);
        self.remote_md5 = Some(remote_md5);
        self.local_mtime = local_mtime;
        self.remote_mtime = remote_mtime;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "5d41402abc4b2a76b9719d911017c592";
    const HASH_B: &str = "7d793037a0760186574b0282f2f435e7";

    fn hash(s: &str) -> ContentHash {
        ContentHash::new(s).unwrap()
    }

    fn local_item() -> SyncItem {
        SyncItem::new_local(
            ConfigId::new(1),
            RelativePath::new("docs/a.txt").unwrap(),
            hash(HASH_A),
            None,
        )
    }

    mod sync_state_tests {
        use super::*;

        #[test]
        fn test_names_roundtrip() {
            for state in SyncState::ALL {
                let parsed: SyncState = state.as_str().parse().unwrap();
                assert_eq!(parsed, state);
            }
            assert!("removed".parse::<SyncState>().is_err());
        }

        #[test]
        fn test_serde_snake_case() {
            let json = serde_json::to_string(&SyncState::PendingDownload).unwrap();
            assert_eq!(json, "\"pending_download\"");
        }

        #[test]
        fn test_predicates() {
            assert!(SyncState::PendingUpload.is_pending());
            assert!(SyncState::PendingDownload.is_pending());
            assert!(!SyncState::Synced.is_pending());
            assert!(SyncState::Conflict.needs_attention());
            assert!(SyncState::Error.needs_attention());
        }
    }

    mod constructor_tests {
        use super::*;

        #[test]
        fn test_new_local_is_pending_upload() {
            let item = local_item();
            assert_eq!(item.state(), SyncState::PendingUpload);
            assert!(item.id().is_none());
            assert!(item.remote_id().is_none());
            assert_eq!(item.local_md5().unwrap().as_str(), HASH_A);
        }

        #[test]
        fn test_new_remote_is_pending_download() {
            let item = SyncItem::new_remote(
                ConfigId::new(1),
                RelativePath::new("b.txt").unwrap(),
                RemoteId::new("r1").unwrap(),
                Some(hash(HASH_B)),
                None,
            );
            assert_eq!(item.state(), SyncState::PendingDownload);
            assert_eq!(item.remote_id().unwrap().as_str(), "r1");
        }
    }

    mod transition_tests {
        use super::*;

        #[test]
        fn test_upload_cycle() {
            let mut item = local_item();
            item.record_sync(RemoteId::new("r1").unwrap(), hash(HASH_A), hash(HASH_A), None, None)
                .unwrap();
            assert_eq!(item.state(), SyncState::Synced);
            assert!(item.hashes_match());

            item.mark_local_changed().unwrap();
            assert_eq!(item.state(), SyncState::PendingUpload);
        }

        #[test]
        fn test_remote_change_is_idempotent() {
            let mut item = local_item();
            item.record_sync(RemoteId::new("r1").unwrap(), hash(HASH_A), hash(HASH_A), None, None)
                .unwrap();
            item.mark_remote_changed().unwrap();
            assert_eq!(item.state(), SyncState::PendingDownload);
            item.mark_remote_changed().unwrap();
            assert_eq!(item.state(), SyncState::PendingDownload);
        }

        #[test]
        fn test_synced_to_conflict_and_back() {
            let mut item = local_item();
            item.record_sync(RemoteId::new("r1").unwrap(), hash(HASH_A), hash(HASH_A), None, None)
                .unwrap();
            item.mark_conflicted().unwrap();
            assert_eq!(item.state(), SyncState::Conflict);

            item.record_sync(RemoteId::new("r1").unwrap(), hash(HASH_B), hash(HASH_B), None, None)
                .unwrap();
            assert_eq!(item.state(), SyncState::Synced);
            assert_eq!(item.remote_md5().unwrap().as_str(), HASH_B);
        }

        #[test]
        fn test_pending_download_can_conflict() {
            let mut item = SyncItem::new_remote(
                ConfigId::new(1),
                RelativePath::new("b.txt").unwrap(),
                RemoteId::new("r1").unwrap(),
                None,
                None,
            );
            item.mark_conflicted().unwrap();
            assert_eq!(item.state(), SyncState::Conflict);
            assert!(!item.can_transition_to(SyncState::PendingDownload));
        }

        #[test]
        fn test_conflict_cannot_go_pending() {
            let mut item = local_item();
            item.mark_conflicted().unwrap();
            assert!(!item.can_transition_to(SyncState::PendingUpload));
            assert!(item.mark_local_changed().is_err());
        }

        #[test]
        fn test_error_allows_retry() {
            let mut item = local_item();
            item.mark_error().unwrap();
            assert!(item.can_transition_to(SyncState::PendingUpload));
            assert!(item.can_transition_to(SyncState::PendingDownload));
            item.mark_local_changed().unwrap();
            assert_eq!(item.state(), SyncState::PendingUpload);
        }

        #[test]
        fn test_synced_refresh_keeps_state() {
            let mut item = local_item();
            item.record_sync(RemoteId::new("r1").unwrap(), hash(HASH_A), hash(HASH_A), None, None)
                .unwrap();
            item.record_sync(RemoteId::new("r2").unwrap(), hash(HASH_B), hash(HASH_B), None, None)
                .unwrap();
            assert_eq!(item.state(), SyncState::Synced);
            assert_eq!(item.remote_id().unwrap().as_str(), "r2");
        }
    }
}
