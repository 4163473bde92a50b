//! Per-configuration sync engine
//!
//! The [`SyncEngine`] is the only writer of one configuration's sync items.
//! It seeds the store with an initial scan, then fans in three producers
//! and handles their output one at a time:
//!
//! 1. **Local events** from the [`LocalWatcher`]: upload, create the remote
//!    folder, or propagate a deletion
//! 2. **Remote change batches** from the [`RemotePoller`]: download, delete
//!    locally, or resolve a conflict; each batch is acknowledged so the
//!    poller can persist its cursor
//! 3. **Sweep ticks**: retry every `pending_upload`, `pending_download` and
//!    `conflict` item, continuing past individual failures
//!
//! All three take the same async mutex, so state transitions for a
//! configuration never interleave. Failures are written to the sync log and
//! leave the item in its last consistent state; they never stop the loop.
//!
//! Renames are handled as a deletion of the old path followed by a creation
//! of the new one.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tandem_audit::{ErrorSource, FailedAction, SyncLogger};
use tandem_conflict::{ConflictDetector, ConflictError, ConflictResolver};
use tandem_core::config::SyncSettings;
use tandem_core::domain::newtypes::{ConfigId, ContentHash, RelativePath, RemoteId};
use tandem_core::domain::{ConflictInfo, ConflictStrategy, SyncConfig, SyncItem, SyncState};
use tandem_core::hashing::compute_md5_async;
use tandem_core::ports::{
    DownloadOutcome, IRemoteChangeFeed, IRemoteContentStore, IRemoteObjectStore, ISyncStateStore,
    RemoteError,
};

use crate::folder_cache::FolderCache;
use crate::ignore::is_ignored;
use crate::poller::{
    default_poll_interval, resolve_poll_interval, ChangeBatch, RemoteChange, RemotePoller,
};
use crate::remote::{is_downloadable, RemoteContentAdapter};
use crate::watcher::{LocalWatcher, WatchEvent, WatchOp};
use crate::SyncError;

// ============================================================================
// Options and reports
// ============================================================================

/// Everything needed to run one configuration
#[derive(Clone)]
pub struct EngineOptions {
    pub config: SyncConfig,
    pub store: Arc<dyn ISyncStateStore>,
    pub objects: Arc<dyn IRemoteObjectStore>,
    pub feed: Arc<dyn IRemoteChangeFeed>,
    /// Quiet period before a local change is handled
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    /// Deadline for each remote call
    pub remote_timeout: Duration,
    pub strategy: ConflictStrategy,
    pub watch_queue_capacity: usize,
    pub change_queue_capacity: usize,
}

impl EngineOptions {
    /// Options with default timings and the `rename` strategy
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn ISyncStateStore>,
        objects: Arc<dyn IRemoteObjectStore>,
        feed: Arc<dyn IRemoteChangeFeed>,
    ) -> Self {
        Self {
            config,
            store,
            objects,
            feed,
            debounce: Duration::from_millis(500),
            poll_interval: default_poll_interval(),
            sweep_interval: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(60),
            strategy: ConflictStrategy::default(),
            watch_queue_capacity: 100,
            change_queue_capacity: 16,
        }
    }

    /// Applies the `sync` section of the configuration file
    ///
    /// The poll interval environment override still wins.
    pub fn with_settings(mut self, settings: &SyncSettings) -> Self {
        self.debounce = settings.debounce();
        self.poll_interval = resolve_poll_interval(settings.poll_interval());
        self.sweep_interval = settings.sweep_interval();
        self.remote_timeout = settings.remote_timeout();
        self.watch_queue_capacity = settings.watch_queue_capacity;
        self.change_queue_capacity = settings.change_queue_capacity;
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}

/// Why [`SyncEngine::start`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The cancellation token fired
    Cancelled,
    /// The watcher closed its event queue on its own
    WatcherStopped,
    /// The poller exited on its own
    PollerStopped,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownReason::Cancelled => "cancelled",
            ShutdownReason::WatcherStopped => "watcher stopped",
            ShutdownReason::PollerStopped => "poller stopped",
        };
        f.write_str(s)
    }
}

/// Result of [`SyncEngine::run_initial_scan`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Untracked files recorded as `pending_upload`
    pub discovered: u32,
    /// Ignored, unreadable or non-regular entries
    pub skipped: u32,
}

/// Result of [`SyncEngine::sweep_pending_uploads`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub uploaded: u32,
    pub downloaded: u32,
    /// Conflicts settled by this sweep
    pub resolved: u32,
    pub failed: u32,
}

/// What a single handler did with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Uploaded,
    Downloaded,
    Resolved,
    Unchanged,
    Failed,
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Bidirectional sync for one configuration
pub struct SyncEngine {
    config: SyncConfig,
    root: PathBuf,
    store: Arc<dyn ISyncStateStore>,
    feed: Arc<dyn IRemoteChangeFeed>,
    folders: Arc<FolderCache>,
    remote: Arc<RemoteContentAdapter>,
    resolver: ConflictResolver,
    logger: SyncLogger,
    debounce: Duration,
    poll_interval: Duration,
    sweep_interval: Duration,
    watch_queue_capacity: usize,
    change_queue_capacity: usize,
    running: AtomicBool,
    /// Held by every handler that reads or writes sync items
    serial: Mutex<()>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    /// Builds the engine together with its private folder cache and remote adapter
    pub fn new(options: EngineOptions) -> Self {
        let root = options.config.local_path().to_path_buf();
        let folders = Arc::new(FolderCache::new(options.config.remote_folder_id().clone()));
        let remote = Arc::new(RemoteContentAdapter::new(
            options.objects,
            Arc::clone(&folders),
            root.clone(),
            options.remote_timeout,
        ));
        let logger = SyncLogger::new(Arc::clone(&options.store), options.config.id());
        let content: Arc<dyn IRemoteContentStore> = remote.clone();
        let resolver = ConflictResolver::new(content, logger.clone(), root.clone(), options.strategy);

        Self {
            config: options.config,
            root,
            store: options.store,
            feed: options.feed,
            folders,
            remote,
            resolver,
            logger,
            debounce: options.debounce,
            poll_interval: options.poll_interval,
            sweep_interval: options.sweep_interval,
            watch_queue_capacity: options.watch_queue_capacity,
            change_queue_capacity: options.change_queue_capacity,
            running: AtomicBool::new(false),
            serial: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn config_id(&self) -> ConfigId {
        self.config.id()
    }

    /// Folder ids resolved so far for this configuration
    pub fn folders(&self) -> &Arc<FolderCache> {
        &self.folders
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Runs the engine until `cancel` fires or a producer stops
    ///
    /// # Errors
    /// Returns [`SyncError::AlreadyRunning`] on re-entry, and the startup
    /// errors (cursor, scan, watcher) before the loop begins. Per-item
    /// failures are logged, never returned.
    #[tracing::instrument(skip(self, cancel), fields(config_id = %self.config.id()))]
    pub async fn start(&self, cancel: CancellationToken) -> Result<ShutdownReason, SyncError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SyncError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);
        self.remote.set_cancellation(cancel.clone());

        info!(root = %self.root.display(), "Starting sync engine");

        // The cursor is taken before the scan so nothing changed during
        // the scan is missed
        let poller = Arc::new(RemotePoller::new(
            Arc::clone(&self.feed),
            Arc::clone(&self.store),
            self.config_id(),
            Arc::clone(&self.folders),
            self.poll_interval,
        ));
        let cursor = poller.initialize().await.map_err(SyncError::InitialCursor)?;

        let watcher = Arc::new(
            LocalWatcher::with_capacity(&self.root, self.debounce, self.watch_queue_capacity)
                .map_err(SyncError::Watcher)?,
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let dirs = {
            let _serial = self.serial.lock().await;
            let (report, dirs) = self
                .scan_local_tree()
                .await
                .map_err(SyncError::InitialScan)?;
            info!(
                discovered = report.discovered,
                skipped = report.skipped,
                "Initial scan complete"
            );
            dirs
        };
        self.warm_folder_cache(&dirs).await;

        let child = cancel.child_token();
        let events = watcher.events();
        let watch_errors = watcher.errors();
        let watch_task = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            let token = child.clone();
            async move { watcher.start(token).await }
        });

        self.sweep_pending_uploads().await;

        let poll_errors = poller.errors();
        let (batch_tx, mut batch_rx) =
            mpsc::channel::<ChangeBatch>(self.change_queue_capacity.max(1));
        let poll_task = tokio::spawn({
            let poller = Arc::clone(&poller);
            let token = child.clone();
            async move { poller.run_from(cursor, batch_tx, token).await }
        });

        let mut sweep =
            tokio::time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break ShutdownReason::Cancelled,
                event = events.recv() => match event {
                    Some(event) => self.handle_local_event(event).await,
                    None if cancel.is_cancelled() => break ShutdownReason::Cancelled,
                    None => break ShutdownReason::WatcherStopped,
                },
                batch = batch_rx.recv() => match batch {
                    Some(batch) => {
                        self.handle_remote_changes(&batch.changes).await;
                        batch.ack();
                    }
                    None => break ShutdownReason::PollerStopped,
                },
                Some(err) = watch_errors.recv() => {
                    self.logger
                        .log_source_error(ErrorSource::Watcher, &format!("{err:#}"))
                        .await;
                }
                Some(err) = poll_errors.recv() => {
                    self.logger
                        .log_source_error(ErrorSource::Poller, &format!("{err:#}"))
                        .await;
                }
                _ = sweep.tick() => {
                    self.sweep_pending_uploads().await;
                }
            }
        };

        child.cancel();
        watcher.stop();
        drop(batch_rx);

        match watch_task.await {
            Ok(Err(err)) => warn!(error = %format!("{err:#}"), "Watcher exited with error"),
            Err(err) => error!(error = %err, "Watcher task panicked"),
            Ok(Ok(())) => {}
        }
        match poll_task.await {
            Ok(Err(err)) => warn!(error = %format!("{err:#}"), "Poller exited with error"),
            Err(err) => error!(error = %err, "Poller task panicked"),
            Ok(Ok(())) => {}
        }

        info!(reason = %reason, "Sync engine stopped");
        Ok(reason)
    }

    /// Resolves remote folder ids for local directories found by the scan
    ///
    /// Lets the poller place changes in subfolders that existed before this
    /// run. Stops at the first remote failure.
    async fn warm_folder_cache(&self, dirs: &[RelativePath]) {
        for dir in dirs {
            match self.remote.locate_folder(dir).await {
                Ok(Some(id)) => debug!(path = %dir, remote_id = %id, "Folder located"),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %dir, error = %e, "Folder lookup failed, cache left cold");
                    break;
                }
            }
        }
    }

    // ========================================================================
    // Initial scan
    // ========================================================================

    /// Records every untracked local file as `pending_upload`
    ///
    /// Tracked files are left untouched, so running it twice changes nothing.
    ///
    /// # Errors
    /// Returns an error if the root cannot be read or the store rejects a write
    pub async fn run_initial_scan(&self) -> Result<ScanReport> {
        let _serial = self.serial.lock().await;
        self.scan_local_tree().await.map(|(report, _)| report)
    }

    /// Walks the tree; returns the report and every non-ignored directory,
    /// shallowest first
    async fn scan_local_tree(&self) -> Result<(ScanReport, Vec<RelativePath>)> {
        let mut report = ScanReport::default();
        let mut dirs = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == self.root => {
                    return Err(e)
                        .with_context(|| format!("Failed to read sync root {}", dir.display()))
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                    report.skipped += 1;
                    continue;
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            {
                let path = entry.path();
                let rel = match RelativePath::from_root(&self.root, &path) {
                    Ok(rel) => rel,
                    Err(err) => {
                        warn!(path = ?path, %err, "Skipping invalid path");
                        report.skipped += 1;
                        continue;
                    }
                };
                if is_ignored(rel.as_str()) {
                    report.skipped += 1;
                    continue;
                }

                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(path = %rel, error = %e, "Cannot stat entry");
                        report.skipped += 1;
                        continue;
                    }
                };
                if file_type.is_dir() {
                    dirs.push(rel);
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    report.skipped += 1;
                    continue;
                }

                let tracked = self
                    .store
                    .get_item(self.config_id(), &rel)
                    .await
                    .context("Failed to query sync item")?;
                if tracked.is_some() {
                    continue;
                }

                let (md5, mtime) = match fingerprint(&path).await {
                    Ok(fp) => fp,
                    Err(e) => {
                        warn!(path = %rel, error = %e, "Cannot hash file, skipping");
                        report.skipped += 1;
                        continue;
                    }
                };
                let item = SyncItem::new_local(self.config_id(), rel.clone(), md5, mtime);
                self.store
                    .save_item(&item)
                    .await
                    .with_context(|| format!("Failed to record {rel}"))?;
                debug!(path = %rel, "Discovered untracked file");
                report.discovered += 1;
            }
        }

        dirs.sort_by_key(|d| d.segments().count());
        Ok((report, dirs))
    }

    // ========================================================================
    // Pending-upload sweep
    // ========================================================================

    /// Retries every `pending_upload` item, then every `pending_download`
    /// item, then every item left in `conflict`
    ///
    /// Items whose file cannot be read are counted as failed and left as
    /// they are; the rest of the batch still runs.
    pub async fn sweep_pending_uploads(&self) -> SweepReport {
        let _serial = self.serial.lock().await;
        let mut report = SweepReport::default();

        let uploads = match self.store.list_pending_uploads(self.config_id()).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to list pending uploads");
                return report;
            }
        };

        for item in uploads {
            let rel = item.local_path().clone();
            if is_ignored(rel.as_str()) {
                continue;
            }
            let abs = rel.to_local(&self.root);
            let (md5, mtime) = match fingerprint(&abs).await {
                Ok(fp) => fp,
                Err(e) => {
                    debug!(path = %rel, error = %e, "Pending upload not readable");
                    self.logger
                        .log_error(rel.as_str(), FailedAction::SweepUpload, &e)
                        .await;
                    report.failed += 1;
                    continue;
                }
            };
            match self
                .push_local(item, &abs, md5, mtime, FailedAction::SweepUpload)
                .await
            {
                Outcome::Uploaded => report.uploaded += 1,
                Outcome::Downloaded => report.downloaded += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Resolved | Outcome::Unchanged => {}
            }
        }

        let downloads = match self
            .store
            .list_items_by_state(self.config_id(), SyncState::PendingDownload)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to list pending downloads");
                Vec::new()
            }
        };
        for item in downloads {
            let name = item.local_path().file_name().to_string();
            match self.pull_remote(item, &name, None).await {
                Outcome::Downloaded => report.downloaded += 1,
                Outcome::Failed => report.failed += 1,
                _ => {}
            }
        }

        let conflicts = match self
            .store
            .list_items_by_state(self.config_id(), SyncState::Conflict)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to list conflicted items");
                Vec::new()
            }
        };
        for item in conflicts {
            match self.retry_conflict(item).await {
                Outcome::Uploaded | Outcome::Downloaded | Outcome::Resolved => report.resolved += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Unchanged => {}
            }
        }

        if report != SweepReport::default() {
            info!(
                uploaded = report.uploaded,
                downloaded = report.downloaded,
                resolved = report.resolved,
                failed = report.failed,
                "Sweep finished"
            );
        }
        report
    }

    /// Re-reads both sides of a conflicted item and settles it again
    ///
    /// A local copy that disappeared is replaced by the remote version.
    async fn retry_conflict(&self, item: SyncItem) -> Outcome {
        let rel = item.local_path().clone();
        let abs = rel.to_local(&self.root);
        match fingerprint(&abs).await {
            Ok((md5, mtime)) => {
                self.push_local(item, &abs, md5, mtime, FailedAction::Conflict)
                    .await
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && item.remote_id().is_some() => {
                debug!(path = %rel, "Conflicted file gone locally, fetching remote version");
                let name = rel.file_name().to_string();
                self.pull_remote(item, &name, None).await
            }
            Err(e) => {
                debug!(path = %rel, error = %e, "Conflicted file not readable");
                self.logger
                    .log_error(rel.as_str(), FailedAction::Conflict, &e)
                    .await;
                Outcome::Failed
            }
        }
    }

    // ========================================================================
    // Local events
    // ========================================================================

    /// Applies one debounced local change
    #[tracing::instrument(skip(self, event), fields(path = %event.rel_path, op = %event.op))]
    pub async fn handle_local_event(&self, event: WatchEvent) {
        let _serial = self.serial.lock().await;

        let rel = match RelativePath::new(event.rel_path.as_str()) {
            Ok(rel) => rel,
            Err(err) => {
                warn!(%err, "Ignoring event with invalid path");
                return;
            }
        };
        if is_ignored(rel.as_str()) {
            return;
        }

        let abs = rel.to_local(&self.root);
        match tokio::fs::metadata(&abs).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.propagate_local_delete(&rel, event.op).await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot stat changed path");
                self.logger
                    .log_error(rel.as_str(), FailedAction::Stat, &e)
                    .await;
            }
            Ok(meta) if meta.is_dir() => self.sync_local_folder(&rel).await,
            Ok(meta) => {
                let mtime = meta.modified().ok().map(DateTime::<Utc>::from);
                self.sync_local_file(&rel, &abs, mtime).await;
            }
        }
    }

    async fn sync_local_folder(&self, rel: &RelativePath) {
        let known = self.folders.get(Some(rel)).is_some();
        match self.remote.create_folder(rel).await {
            Ok(id) if !known => {
                info!(path = %rel, remote_id = %id, "Folder synced");
                self.logger.log_folder_upload(rel, &id).await;
            }
            Ok(_) => debug!(path = %rel, "Folder already synced"),
            Err(e) => {
                self.report_remote_error(rel.as_str(), FailedAction::CreateFolder, None, &e)
                    .await
            }
        }
    }

    async fn sync_local_file(
        &self,
        rel: &RelativePath,
        abs: &Path,
        mtime: Option<DateTime<Utc>>,
    ) {
        let md5 = match compute_md5_async(abs.to_path_buf()).await {
            Ok(md5) => md5,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.propagate_local_delete(rel, WatchOp::Delete).await;
                return;
            }
            Err(e) => {
                self.logger
                    .log_error(rel.as_str(), FailedAction::Upload, &e)
                    .await;
                return;
            }
        };

        let Some(existing) = self.load_item(rel).await else {
            return;
        };

        let item = match existing {
            Some(item) if item.state() == SyncState::Synced && item.local_md5() == Some(&md5) => {
                debug!(path = %rel, "Content unchanged since last sync");
                return;
            }
            Some(item) => item,
            None => {
                let item = SyncItem::new_local(self.config_id(), rel.clone(), md5.clone(), mtime);
                match self.save(&item).await {
                    Some(saved) => saved,
                    None => return,
                }
            }
        };

        self.push_local(item, abs, md5, mtime, FailedAction::Upload)
            .await;
    }

    /// Sends local content to the remote, unless the remote moved too
    ///
    /// When the item is already linked to a remote object, its current
    /// checksum decides between uploading, converging on equal content,
    /// pulling a remote-only change, or resolving a conflict.
    async fn push_local(
        &self,
        item: SyncItem,
        abs: &Path,
        md5: ContentHash,
        mtime: Option<DateTime<Utc>>,
        action: FailedAction,
    ) -> Outcome {
        if let Some(remote_id) = item.remote_id().cloned() {
            match self.remote.metadata(&remote_id).await {
                Ok(meta) if !meta.trashed && !meta.is_folder => {
                    if let Some(remote_md5) = meta.md5.clone() {
                        if remote_md5 == md5 {
                            return self
                                .converge(item, remote_id, md5, mtime, meta.modified)
                                .await;
                        }
                        let info = ConflictDetector::compare(
                            &item,
                            md5.clone(),
                            mtime,
                            remote_md5,
                            meta.modified,
                        );
                        if info.is_conflict() {
                            return self.resolve_conflict(item, info).await;
                        }
                        if !info.local_modified && info.remote_modified {
                            return self.pull_remote(item, &meta.name, meta.modified).await;
                        }
                    }
                }
                Ok(_) => debug!(path = %item.local_path(), "Remote copy gone, uploading anew"),
                Err(e) if e.is_not_found() => {
                    debug!(path = %item.local_path(), "Remote copy missing, uploading anew")
                }
                Err(e) => {
                    self.report_remote_error(
                        item.local_path().as_str(),
                        action,
                        Some(&remote_id),
                        &e,
                    )
                    .await;
                    return Outcome::Failed;
                }
            }
        }

        self.upload(item, abs, md5, mtime, action).await
    }

    async fn upload(
        &self,
        mut item: SyncItem,
        abs: &Path,
        md5: ContentHash,
        mtime: Option<DateTime<Utc>>,
        action: FailedAction,
    ) -> Outcome {
        let rel = item.local_path().clone();

        // Record the intent first so a crash mid-upload leaves it for the sweep
        if advance(&mut item, SyncState::PendingUpload) {
            item = match self.save(&item).await {
                Some(saved) => saved,
                None => return Outcome::Failed,
            };
        }

        let outcome = match self.remote.upload(&rel, abs).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report_remote_error(rel.as_str(), action, item.remote_id(), &e)
                    .await;
                return Outcome::Failed;
            }
        };

        if let Err(err) = item.record_sync(
            outcome.remote_id.clone(),
            md5,
            outcome.md5.clone(),
            mtime,
            Some(outcome.modified),
        ) {
            self.logger
                .log_error(rel.as_str(), FailedAction::UpdateSyncItem, &err)
                .await;
            return Outcome::Failed;
        }
        if self.save(&item).await.is_none() {
            return Outcome::Failed;
        }

        info!(path = %rel, remote_id = %outcome.remote_id, "Uploaded");
        self.logger
            .log_upload(&rel, &outcome.remote_id, &outcome.md5)
            .await;
        Outcome::Uploaded
    }

    /// Handles a local path that no longer exists
    async fn propagate_local_delete(&self, rel: &RelativePath, op: WatchOp) {
        let action = if op == WatchOp::Rename {
            FailedAction::RenameDelete
        } else {
            FailedAction::Delete
        };

        let Some(existing) = self.load_item(rel).await else {
            return;
        };

        match existing {
            // The remote side still holds the other version; the sweep retries
            Some(item) if item.state() == SyncState::Conflict => {
                debug!(path = %rel, "Conflicted file missing locally, remote kept");
            }
            Some(item) => {
                if let Some(remote_id) = item.remote_id() {
                    if let Err(e) = self.remote.delete(rel).await {
                        self.report_remote_error(rel.as_str(), action, Some(remote_id), &e)
                            .await;
                        return;
                    }
                }
                self.forget(rel).await;
                info!(path = %rel, "Deletion propagated");
                self.logger.log_delete(rel, item.remote_id()).await;
            }
            None => match self.remote.delete_folder(rel).await {
                Ok(true) => {
                    for item in self.items_under(rel).await {
                        self.forget(item.local_path()).await;
                    }
                    info!(path = %rel, "Folder deletion propagated");
                    self.logger.log_delete(rel, None).await;
                }
                Ok(false) => debug!(path = %rel, "Untracked path removed"),
                Err(e) => self.report_remote_error(rel.as_str(), action, None, &e).await,
            },
        }
    }

    // ========================================================================
    // Remote changes
    // ========================================================================

    /// Applies one batch from the poller, in feed order
    pub async fn handle_remote_changes(&self, changes: &[RemoteChange]) {
        let _serial = self.serial.lock().await;
        for change in changes {
            self.handle_remote_change(change).await;
        }
    }

    #[tracing::instrument(skip(self, change), fields(remote_id = %change.remote_id, op = %change.op))]
    async fn handle_remote_change(&self, change: &RemoteChange) {
        if change.removed {
            self.apply_remote_removal(change).await;
            return;
        }
        if change.is_folder {
            self.apply_remote_folder(change).await;
            return;
        }
        if !is_downloadable(change.mime_type.as_deref()) {
            debug!(name = %change.name, "Skipping native document");
            return;
        }

        match self
            .store
            .get_item_by_remote_id(self.config_id(), &change.remote_id)
            .await
        {
            Ok(Some(item)) => self.apply_remote_update(item, change).await,
            Ok(None) => self.apply_remote_create(change).await,
            Err(e) => {
                self.logger
                    .log_remote_error(
                        &change.name,
                        FailedAction::Download,
                        &change.remote_id,
                        &format!("{e:#}"),
                    )
                    .await
            }
        }
    }

    async fn apply_remote_update(&self, item: SyncItem, change: &RemoteChange) {
        let rel = item.local_path().clone();
        let Some(remote_md5) = change.md5.clone() else {
            debug!(path = %rel, "Change carries no checksum, skipping");
            return;
        };

        let same_name = change.name == rel.file_name();
        if same_name
            && item.state() != SyncState::PendingDownload
            && item.remote_md5() == Some(&remote_md5)
        {
            debug!(path = %rel, "Remote content matches baseline");
            return;
        }

        let abs = rel.to_local(&self.root);
        match ConflictDetector::detect(&item, &abs, remote_md5, change.modified).await {
            Ok(Some(info)) if same_name && info.local_md5 == info.remote_md5 => {
                let Some(remote_id) = item.remote_id().cloned() else {
                    return;
                };
                self.converge(item, remote_id, info.local_md5, info.local_mtime, change.modified)
                    .await;
            }
            Ok(Some(info)) if !same_name && info.local_modified => {
                self.split_renamed(item, info, change).await;
            }
            Ok(Some(info)) if info.is_conflict() => {
                self.resolve_conflict(item, info).await;
            }
            Ok(Some(info)) if same_name && info.local_modified && !info.remote_modified => {
                self.upload(item, &abs, info.local_md5, info.local_mtime, FailedAction::Upload)
                    .await;
            }
            Ok(_) => {
                self.pull_remote(item, &change.name, change.modified).await;
            }
            Err(e) => {
                self.logger
                    .log_remote_error(rel.as_str(), FailedAction::Download, &change.remote_id, &e)
                    .await
            }
        }
    }

    /// The remote object was renamed while the local copy has unsent edits
    ///
    /// The local file stays at its old path as a new, unlinked upload and
    /// the remote object is downloaded to its new path.
    async fn split_renamed(&self, item: SyncItem, info: ConflictInfo, change: &RemoteChange) {
        let old = item.local_path().clone();
        info!(
            from = %old,
            to = %change.name,
            "Remote rename of a locally edited file, keeping both"
        );

        self.forget(&old).await;
        let detached = SyncItem::new_local(
            self.config_id(),
            old.clone(),
            info.local_md5.clone(),
            info.local_mtime,
        );
        let Some(detached) = self.save(&detached).await else {
            return;
        };
        let abs = old.to_local(&self.root);
        self.upload(detached, &abs, info.local_md5, info.local_mtime, FailedAction::Upload)
            .await;

        match self.expected_path(change) {
            Some(new_path) if new_path != old && !is_ignored(new_path.as_str()) => {
                let moved = SyncItem::new_remote(
                    self.config_id(),
                    new_path,
                    change.remote_id.clone(),
                    change.md5.clone(),
                    change.modified,
                );
                self.pull_remote(moved, &change.name, change.modified).await;
            }
            _ => debug!(name = %change.name, "Renamed object left the watched tree"),
        }
    }

    async fn apply_remote_create(&self, change: &RemoteChange) {
        let Some(rel) = self.expected_path(change) else {
            debug!(name = %change.name, "Parent folder unknown, skipping");
            return;
        };
        if is_ignored(rel.as_str()) {
            return;
        }

        let abs = rel.to_local(&self.root);
        if abs.is_file() {
            let Some(remote_md5) = change.md5.clone() else {
                warn!(path = %rel, "Local file exists and remote has no checksum, skipping");
                return;
            };
            let (local_md5, local_mtime) = match fingerprint(&abs).await {
                Ok(fp) => fp,
                Err(e) => {
                    self.logger
                        .log_remote_error(rel.as_str(), FailedAction::Download, &change.remote_id, &e)
                        .await;
                    return;
                }
            };

            let Some(existing) = self.load_item(&rel).await else {
                return;
            };
            let item = existing.unwrap_or_else(|| {
                SyncItem::new_local(self.config_id(), rel.clone(), local_md5.clone(), local_mtime)
            });

            if local_md5 == remote_md5 {
                debug!(path = %rel, "Adopting identical remote file");
                self.converge(item, change.remote_id.clone(), local_md5, local_mtime, change.modified)
                    .await;
                return;
            }

            // Both sides created the same path independently
            let info = ConflictInfo {
                rel_path: rel,
                remote_id: Some(change.remote_id.clone()),
                local_md5,
                remote_md5,
                local_mtime,
                remote_mtime: change.modified,
                last_sync_local_md5: None,
                last_sync_remote_md5: None,
                last_sync_mtime: None,
                local_modified: true,
                remote_modified: true,
            };
            self.resolve_conflict(item, info).await;
            return;
        }

        let item = SyncItem::new_remote(
            self.config_id(),
            rel,
            change.remote_id.clone(),
            change.md5.clone(),
            change.modified,
        );
        self.pull_remote(item, &change.name, change.modified).await;
    }

    async fn apply_remote_folder(&self, change: &RemoteChange) {
        let Some(rel) = self.expected_path(change) else {
            debug!(name = %change.name, "Folder outside known tree, skipping");
            return;
        };
        if is_ignored(rel.as_str()) {
            return;
        }

        if let Some(previous) = self.folders.path_of(&change.remote_id) {
            if previous != rel {
                debug!(from = %previous, to = %rel, "Remote folder moved");
                self.folders.evict_tree(&previous);
            }
        }
        self.folders.insert(&rel, change.remote_id.clone());

        let abs = rel.to_local(&self.root);
        if let Err(e) = tokio::fs::create_dir_all(&abs).await {
            warn!(path = %rel, error = %e, "Failed to create local folder");
        } else {
            debug!(path = %rel, "Local folder ensured");
        }
    }

    async fn apply_remote_removal(&self, change: &RemoteChange) {
        let tracked = match self
            .store
            .get_item_by_remote_id(self.config_id(), &change.remote_id)
            .await
        {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "Failed to look up removed object");
                return;
            }
        };

        if let Some(item) = tracked {
            self.remove_local_copy(item, &change.remote_id).await;
            return;
        }

        let Some(dir) = self.folders.path_of(&change.remote_id) else {
            debug!("Removed object was never tracked");
            return;
        };
        self.folders.evict_tree(&dir);
        for item in self.items_under(&dir).await {
            if let Some(remote_id) = item.remote_id().cloned() {
                self.remove_local_copy(item, &remote_id).await;
            }
        }
        let abs = dir.to_local(&self.root);
        match remove_empty_tree(&abs).await {
            Ok(true) => info!(path = %dir, "Local folder removed"),
            Ok(false) => debug!(path = %dir, "Local folder kept, not empty"),
            Err(e) => debug!(path = %dir, error = %e, "Local folder not removed"),
        }
    }

    /// Deletes the local file of an item whose remote object is gone
    ///
    /// A file with unsent local edits is kept and re-queued for upload.
    async fn remove_local_copy(&self, item: SyncItem, remote_id: &RemoteId) {
        let rel = item.local_path().clone();
        let abs = rel.to_local(&self.root);

        if item.state() == SyncState::PendingUpload {
            if let Ok((md5, mtime)) = fingerprint(&abs).await {
                info!(path = %rel, "Remote copy removed while local edits pending, re-uploading");
                self.forget(&rel).await;
                let fresh = SyncItem::new_local(self.config_id(), rel, md5, mtime);
                self.save(&fresh).await;
                return;
            }
        }

        match tokio::fs::remove_file(&abs).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                self.logger
                    .log_remote_error(rel.as_str(), FailedAction::LocalDelete, remote_id, &e)
                    .await;
                return;
            }
        }
        self.forget(&rel).await;
        info!(path = %rel, "Remote deletion applied locally");
        self.logger.log_download_delete(&rel, remote_id).await;
    }

    /// Downloads the item's remote object and marks it synced
    async fn pull_remote(
        &self,
        mut item: SyncItem,
        name: &str,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Outcome {
        let Some(remote_id) = item.remote_id().cloned() else {
            return Outcome::Failed;
        };
        let remote_mtime = remote_mtime.or(item.remote_mtime());

        if advance(&mut item, SyncState::PendingDownload) || item.id().is_none() {
            item = match self.save(&item).await {
                Some(saved) => saved,
                None => return Outcome::Failed,
            };
        }

        match self.remote.download(&remote_id, name).await {
            Ok(download) => {
                self.finish_download(item, &remote_id, download, remote_mtime)
                    .await
            }
            Err(e) => {
                let rel = item.local_path().clone();
                self.report_remote_error(rel.as_str(), FailedAction::Download, Some(&remote_id), &e)
                    .await;
                if matches!(e, RemoteError::Unsupported(_)) || e.is_not_found() {
                    self.forget(&rel).await;
                }
                Outcome::Failed
            }
        }
    }

    async fn finish_download(
        &self,
        mut item: SyncItem,
        remote_id: &RemoteId,
        download: DownloadOutcome,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Outcome {
        let previous = item.local_path().clone();
        if download.rel_path != previous {
            // The object lives elsewhere now; the old path goes away
            debug!(from = %previous, to = %download.rel_path, "Remote file moved");
            match tokio::fs::remove_file(previous.to_local(&self.root)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %previous, error = %e, "Failed to remove old local copy"),
            }
            self.forget(&previous).await;
            item = SyncItem::new_remote(
                self.config_id(),
                download.rel_path.clone(),
                remote_id.clone(),
                Some(download.md5.clone()),
                remote_mtime,
            );
        }

        let local_mtime = file_mtime(&download.rel_path.to_local(&self.root)).await;
        if let Err(err) = item.record_sync(
            remote_id.clone(),
            download.md5.clone(),
            download.md5.clone(),
            local_mtime,
            remote_mtime,
        ) {
            self.logger
                .log_error(download.rel_path.as_str(), FailedAction::UpdateSyncItem, &err)
                .await;
            return Outcome::Failed;
        }
        if self.save(&item).await.is_none() {
            return Outcome::Failed;
        }

        info!(path = %download.rel_path, remote_id = %remote_id, "Downloaded");
        self.logger
            .log_download(&download.rel_path, remote_id, &download.md5)
            .await;
        Outcome::Downloaded
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    async fn resolve_conflict(&self, mut item: SyncItem, info: ConflictInfo) -> Outcome {
        let rel = info.rel_path.clone();

        if advance(&mut item, SyncState::Conflict) {
            item = match self.save(&item).await {
                Some(saved) => saved,
                None => return Outcome::Failed,
            };
        }

        let outcome = match self.resolver.resolve(&info).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if is_cancelled(&e) {
                    debug!(path = %rel, "Conflict resolution cancelled");
                } else {
                    warn!(path = %rel, error = %e, "Conflict resolution failed");
                    self.logger
                        .log_error(rel.as_str(), FailedAction::Conflict, &e)
                        .await;
                }
                if item.state() != SyncState::Conflict && advance(&mut item, SyncState::Error) {
                    self.save(&item).await;
                }
                return Outcome::Failed;
            }
        };

        let local_mtime = file_mtime(&rel.to_local(&self.root)).await;
        if let Err(err) = item.record_sync(
            outcome.remote_id.clone(),
            outcome.md5.clone(),
            outcome.md5.clone(),
            local_mtime,
            outcome.remote_mtime,
        ) {
            self.logger
                .log_error(rel.as_str(), FailedAction::UpdateSyncItem, &err)
                .await;
            return Outcome::Failed;
        }
        if self.save(&item).await.is_none() {
            return Outcome::Failed;
        }

        if let Some(renamed) = outcome.renamed_to {
            match fingerprint(&renamed.to_local(&self.root)).await {
                Ok((md5, mtime)) => {
                    let copy = SyncItem::new_local(self.config_id(), renamed, md5, mtime);
                    self.save(&copy).await;
                }
                Err(e) => warn!(path = %renamed, error = %e, "Conflict copy not readable"),
            }
        }
        Outcome::Resolved
    }

    /// Both sides hold the same bytes: refresh the baseline without a transfer
    async fn converge(
        &self,
        mut item: SyncItem,
        remote_id: RemoteId,
        md5: ContentHash,
        local_mtime: Option<DateTime<Utc>>,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Outcome {
        let rel = item.local_path().clone();
        if let Err(err) = item.record_sync(remote_id, md5.clone(), md5, local_mtime, remote_mtime) {
            self.logger
                .log_error(rel.as_str(), FailedAction::UpdateSyncItem, &err)
                .await;
            return Outcome::Failed;
        }
        if self.save(&item).await.is_none() {
            return Outcome::Failed;
        }
        debug!(path = %rel, "Both sides already match");
        Outcome::Unchanged
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Where a remote object should live locally, from its cached parent
    fn expected_path(&self, change: &RemoteChange) -> Option<RelativePath> {
        if change.name.is_empty() || change.name.contains(['/', '\\']) {
            return None;
        }
        change.parents.iter().find_map(|parent| {
            if parent == self.folders.root() {
                RelativePath::new(change.name.as_str()).ok()
            } else {
                self.folders
                    .path_of(parent)
                    .and_then(|dir| dir.join(&change.name).ok())
            }
        })
    }

    /// `None` when the lookup failed (already logged)
    async fn load_item(&self, rel: &RelativePath) -> Option<Option<SyncItem>> {
        match self.store.get_item(self.config_id(), rel).await {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(path = %rel, error = %e, "Failed to load sync item");
                self.logger
                    .log_error(rel.as_str(), FailedAction::UpdateSyncItem, &format!("{e:#}"))
                    .await;
                None
            }
        }
    }

    /// Persists an item; `None` when the write failed (already logged)
    async fn save(&self, item: &SyncItem) -> Option<SyncItem> {
        match self.store.save_item(item).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                error!(path = %item.local_path(), error = %e, "Failed to save sync item");
                self.logger
                    .log_error(
                        item.local_path().as_str(),
                        FailedAction::UpdateSyncItem,
                        &format!("{e:#}"),
                    )
                    .await;
                None
            }
        }
    }

    async fn forget(&self, rel: &RelativePath) {
        if let Err(e) = self.store.remove_item(self.config_id(), rel).await {
            error!(path = %rel, error = %e, "Failed to remove sync item");
            self.logger
                .log_error(rel.as_str(), FailedAction::RemoveSyncItem, &format!("{e:#}"))
                .await;
        }
    }

    /// Tracked items at or beneath `dir`, in any state
    async fn items_under(&self, dir: &RelativePath) -> Vec<SyncItem> {
        let mut found = Vec::new();
        for state in SyncState::ALL {
            match self.store.list_items_by_state(self.config_id(), state).await {
                Ok(items) => found.extend(items.into_iter().filter(|i| i.local_path().starts_with(dir))),
                Err(e) => warn!(state = %state, error = %e, "Failed to list sync items"),
            }
        }
        found
    }

    async fn report_remote_error(
        &self,
        path: &str,
        action: FailedAction,
        remote_id: Option<&RemoteId>,
        err: &RemoteError,
    ) {
        if matches!(err, RemoteError::Cancelled) {
            debug!(path, action = %action.as_str(), "Remote call cancelled");
            return;
        }
        warn!(path, action = %action.as_str(), error = %err, "Remote operation failed");
        match remote_id {
            Some(id) => self.logger.log_remote_error(path, action, id, err).await,
            None => self.logger.log_error(path, action, err).await,
        }
    }
}

/// Moves `item` to `target` when the state machine allows it
fn advance(item: &mut SyncItem, target: SyncState) -> bool {
    item.state() != target && item.can_transition_to(target) && item.transition_to(target).is_ok()
}

fn is_cancelled(err: &ConflictError) -> bool {
    matches!(err, ConflictError::Remote(RemoteError::Cancelled))
}

async fn fingerprint(path: &Path) -> io::Result<(ContentHash, Option<DateTime<Utc>>)> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    let md5 = compute_md5_async(path.to_path_buf()).await?;
    Ok((md5, meta.modified().ok().map(DateTime::<Utc>::from)))
}

async fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from)
}

/// Removes `dir` and its subdirectories if they hold no files
///
/// Returns whether `dir` itself was removed.
fn remove_empty_tree(
    dir: &Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = io::Result<bool>> + Send + '_>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut empty = true;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                empty &= remove_empty_tree(&entry.path()).await?;
            } else {
                empty = false;
            }
        }
        if empty {
            tokio::fs::remove_dir(dir).await?;
        }
        Ok(empty)
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::hashing::md5_bytes;

    fn hash(bytes: &[u8]) -> ContentHash {
        md5_bytes(bytes)
    }

    #[test]
    fn test_advance_respects_state_machine() {
        let mut item = SyncItem::new_remote(
            ConfigId::new(1),
            RelativePath::new("a.txt").unwrap(),
            RemoteId::new("r1").unwrap(),
            Some(hash(b"a")),
            None,
        );
        assert!(!advance(&mut item, SyncState::PendingUpload));
        assert!(!advance(&mut item, SyncState::PendingDownload));
        assert!(advance(&mut item, SyncState::Error));
        assert_eq!(item.state(), SyncState::Error);
        assert!(advance(&mut item, SyncState::PendingUpload));
    }

    #[test]
    fn test_shutdown_reason_display() {
        assert_eq!(ShutdownReason::Cancelled.to_string(), "cancelled");
        assert_eq!(ShutdownReason::WatcherStopped.to_string(), "watcher stopped");
        assert_eq!(ShutdownReason::PollerStopped.to_string(), "poller stopped");
    }

    #[tokio::test]
    async fn test_remove_empty_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let empty = dir.path().join("empty/nested");
        std::fs::create_dir_all(&empty).unwrap();
        let full = dir.path().join("full/nested");
        std::fs::create_dir_all(&full).unwrap();
        std::fs::write(full.join("keep.txt"), b"x").unwrap();

        assert!(remove_empty_tree(&dir.path().join("empty")).await.unwrap());
        assert!(!dir.path().join("empty").exists());

        assert!(!remove_empty_tree(&dir.path().join("full")).await.unwrap());
        assert!(full.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_fingerprint_rejects_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(fingerprint(dir.path()).await.is_err());

        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();
        let (md5, mtime) = fingerprint(&file).await.unwrap();
        assert_eq!(md5, hash(b"hello"));
        assert!(mtime.is_some());
    }
}
