//! Conflict detection logic
//!
//! Three-way comparison: the fingerprints recorded at the last
//! reconciliation are the baseline, and each side counts as modified when
//! its current fingerprint differs from its own baseline. Only when both
//! sides moved is there a conflict.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use tandem_core::domain::{newtypes::ContentHash, ConflictInfo, SyncItem};
use tandem_core::hashing::compute_md5_async;

use crate::error::ConflictError;

/// Detects conflicts between local and remote file versions
pub struct ConflictDetector;

impl ConflictDetector {
    /// Compares fresh fingerprints of both sides against the item's baseline
    ///
    /// A side without a recorded baseline counts as modified.
    pub fn compare(
        item: &SyncItem,
        local_md5: ContentHash,
        local_mtime: Option<DateTime<Utc>>,
        remote_md5: ContentHash,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> ConflictInfo {
        let local_modified = item.local_md5() != Some(&local_md5);
        let remote_modified = item.remote_md5() != Some(&remote_md5);

        let info = ConflictInfo {
            rel_path: item.local_path().clone(),
            remote_id: item.remote_id().cloned(),
            local_md5,
            remote_md5,
            local_mtime,
            remote_mtime,
            last_sync_local_md5: item.local_md5().cloned(),
            last_sync_remote_md5: item.remote_md5().cloned(),
            last_sync_mtime: item.local_mtime(),
            local_modified,
            remote_modified,
        };

        if info.is_conflict() {
            info!(
                path = %info.rel_path,
                local_md5 = %info.local_md5,
                remote_md5 = %info.remote_md5,
                "Conflict detected: both local and remote versions changed"
            );
        } else {
            debug!(
                path = %info.rel_path,
                local_modified,
                remote_modified,
                "No conflict"
            );
        }

        info
    }

    /// Fingerprints the local file at `abs_path` and compares both sides
    ///
    /// Returns `Ok(None)` when the local file is gone: a local deletion is
    /// handled as delete propagation, never as a conflict.
    ///
    /// # Errors
    ///
    /// Returns `ConflictError::LocalRead` if the file exists but cannot be read.
    pub async fn detect(
        item: &SyncItem,
        abs_path: &Path,
        remote_md5: ContentHash,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Result<Option<ConflictInfo>, ConflictError> {
        let metadata = match tokio::fs::metadata(abs_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConflictError::LocalRead {
                    path: abs_path.to_path_buf(),
                    source: e,
                })
            }
        };
        let local_mtime = metadata.modified().ok().map(DateTime::<Utc>::from);

        let local_md5 = match compute_md5_async(abs_path.to_path_buf()).await {
            Ok(md5) => md5,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConflictError::LocalRead {
                    path: abs_path.to_path_buf(),
                    source: e,
                })
            }
        };

        Ok(Some(Self::compare(
            item,
            local_md5,
            local_mtime,
            remote_md5,
            remote_mtime,
        )))
    }
}
