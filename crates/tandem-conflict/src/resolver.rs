//! Conflict resolution executor
//!
//! Applies the configured strategy by performing the actual file operations:
//! - `Rename`: rename local with a conflict suffix, download remote to the original path
//! - `LocalWins`: upload local version, overwriting remote
//! - `RemoteWins`: download remote version to replace local
//!
//! Every successful resolution is written to the sync log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tandem_audit::SyncLogger;
use tandem_core::{
    domain::{
        newtypes::{ContentHash, RelativePath, RemoteId},
        ConflictInfo, ConflictStrategy,
    },
    ports::IRemoteContentStore,
};

use crate::{error::ConflictError, namer::ConflictNamer};

/// What a resolution did, and the baseline both sides now share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub strategy: ConflictStrategy,
    /// Where the local version was moved (rename only)
    pub renamed_to: Option<RelativePath>,
    pub upload_local: bool,
    pub download_remote: bool,
    pub remote_id: RemoteId,
    /// Fingerprint of the content now at the original path on both sides
    pub md5: ContentHash,
    pub remote_mtime: Option<DateTime<Utc>>,
}

/// Applies conflict resolutions for one configuration
pub struct ConflictResolver {
    content: Arc<dyn IRemoteContentStore>,
    logger: SyncLogger,
    root: PathBuf,
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(
        content: Arc<dyn IRemoteContentStore>,
        logger: SyncLogger,
        root: PathBuf,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            content,
            logger,
            root,
            strategy,
        }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve a detected conflict with the configured strategy
    ///
    /// # Errors
    ///
    /// Returns an error if the rename, upload or download fails. Nothing is
    /// logged as a conflict in that case; the caller keeps the item in
    /// `conflict` and records the failure.
    pub async fn resolve(&self, info: &ConflictInfo) -> Result<ResolveOutcome, ConflictError> {
        info!(
            path = %info.rel_path,
            strategy = %self.strategy,
            "Applying conflict resolution"
        );

        let outcome = match self.strategy {
            ConflictStrategy::Rename => self.apply_rename(info).await?,
            ConflictStrategy::LocalWins => self.apply_local_wins(info).await?,
            ConflictStrategy::RemoteWins => self.apply_remote_wins(info).await?,
        };

        self.logger
            .log_conflict(
                &info.rel_path,
                outcome.strategy,
                outcome.renamed_to.as_ref(),
                &info.local_md5,
                &info.remote_md5,
            )
            .await;

        info!(
            path = %info.rel_path,
            strategy = %outcome.strategy,
            renamed_to = ?outcome.renamed_to.as_ref().map(RelativePath::as_str),
            "Conflict resolved"
        );
        Ok(outcome)
    }

    /// Rename: move local aside, then fetch remote into the original path
    async fn apply_rename(&self, info: &ConflictInfo) -> Result<ResolveOutcome, ConflictError> {
        let remote_id = require_remote_id(info)?;
        let original = info.rel_path.to_local(&self.root);
        let parent_dir = original
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        let conflict_name = ConflictNamer::generate_unique(
            info.rel_path.file_name(),
            Utc::now(),
            |candidate| parent_dir.join(candidate).exists(),
        )
        .ok_or_else(|| ConflictError::NameExhausted(info.rel_path.to_string()))?;

        let renamed_to = info
            .rel_path
            .with_file_name(&conflict_name)
            .map_err(|_| ConflictError::NameExhausted(info.rel_path.to_string()))?;
        let renamed_abs = renamed_to.to_local(&self.root);

        tokio::fs::rename(&original, &renamed_abs)
            .await
            .map_err(|e| ConflictError::RenameFailed {
                from: original.clone(),
                to: renamed_abs.clone(),
                source: e,
            })?;
        debug!(from = %info.rel_path, to = %renamed_to, "Local version moved aside");

        let download = match self
            .content
            .download(&remote_id, info.rel_path.file_name())
            .await
        {
            Ok(download) => download,
            Err(e) => {
                self.restore_original(&renamed_abs, &original).await;
                return Err(e.into());
            }
        };
        if download.rel_path != info.rel_path {
            warn!(
                expected = %info.rel_path,
                actual = %download.rel_path,
                "Remote version landed at a different path"
            );
        }

        Ok(ResolveOutcome {
            strategy: ConflictStrategy::Rename,
            renamed_to: Some(renamed_to),
            upload_local: false,
            download_remote: true,
            remote_id,
            md5: download.md5,
            remote_mtime: info.remote_mtime,
        })
    }

    /// Puts the local version back after a failed rename resolution
    ///
    /// Skipped when something already occupies the original path.
    async fn restore_original(&self, renamed_abs: &Path, original: &Path) {
        if tokio::fs::try_exists(original).await.unwrap_or(true) {
            warn!(path = %original.display(), "Original path occupied, conflict copy left in place");
            return;
        }
        match tokio::fs::rename(renamed_abs, original).await {
            Ok(()) => debug!(path = %original.display(), "Local version restored"),
            Err(e) => warn!(
                from = %renamed_abs.display(),
                to = %original.display(),
                error = %e,
                "Failed to restore local version"
            ),
        }
    }

    /// Local wins: push local bytes over the remote version
    async fn apply_local_wins(&self, info: &ConflictInfo) -> Result<ResolveOutcome, ConflictError> {
        let abs = info.rel_path.to_local(&self.root);
        let upload = self.content.upload(&info.rel_path, &abs).await?;

        Ok(ResolveOutcome {
            strategy: ConflictStrategy::LocalWins,
            renamed_to: None,
            upload_local: true,
            download_remote: false,
            remote_id: upload.remote_id,
            md5: upload.md5,
            remote_mtime: Some(upload.modified),
        })
    }

    /// Remote wins: overwrite local with the remote version
    async fn apply_remote_wins(
        &self,
        info: &ConflictInfo,
    ) -> Result<ResolveOutcome, ConflictError> {
        let remote_id = require_remote_id(info)?;
        let download = self
            .content
            .download(&remote_id, info.rel_path.file_name())
            .await?;

        Ok(ResolveOutcome {
            strategy: ConflictStrategy::RemoteWins,
            renamed_to: None,
            upload_local: false,
            download_remote: true,
            remote_id,
            md5: download.md5,
            remote_mtime: info.remote_mtime,
        })
    }
}

fn require_remote_id(info: &ConflictInfo) -> Result<RemoteId, ConflictError> {
    info.remote_id
        .clone()
        .ok_or_else(|| ConflictError::MissingRemoteId(info.rel_path.to_string()))
}
