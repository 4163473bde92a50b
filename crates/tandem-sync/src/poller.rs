//! Incremental remote change detection
//!
//! The [`RemotePoller`] follows the remote change feed from an opaque
//! cursor. Each tick drains every page since the cursor, keeps the changes
//! that live under the watched folder, and hands them to the engine as one
//! [`ChangeBatch`]. The cursor is persisted only after the engine
//! acknowledges the batch, so a crash mid-batch means the batch is fetched
//! again on restart.
//!
//! ## Flow
//!
//! ```text
//! ticker ──→ list_changes_since (all pages) ──→ filter by parent ──→ classify
//!                                                                     │
//!              update_change_token ◀── ack (oneshot) ◀── mpsc::Sender<ChangeBatch>
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tandem_core::domain::newtypes::{ChangeCursor, ConfigId, ContentHash, RemoteId};
use tandem_core::ports::{FeedChange, IRemoteChangeFeed, ISyncStateStore};

use crate::folder_cache::FolderCache;
use crate::queue::{BoundedQueue, Overflow};
use crate::remote::FOLDER_MIME_TYPE;

/// Poll interval when neither configuration nor environment set one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Environment variable overriding the poll interval (`"10s"`, `"1m"`)
pub const POLL_INTERVAL_ENV: &str = "TANDEM_SYNC_POLL_INTERVAL";

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

const ERROR_CAPACITY: usize = 10;

/// The poll interval, honouring [`POLL_INTERVAL_ENV`]
pub fn default_poll_interval() -> Duration {
    resolve_poll_interval(DEFAULT_POLL_INTERVAL)
}

/// `fallback` unless [`POLL_INTERVAL_ENV`] holds a valid duration
pub fn resolve_poll_interval(fallback: Duration) -> Duration {
    let raw = std::env::var(POLL_INTERVAL_ENV).ok();
    match parse_poll_interval(raw.as_deref()) {
        Some(interval) => {
            debug!(interval = ?interval, "Poll interval taken from environment");
            interval
        }
        None => fallback,
    }
}

fn parse_poll_interval(raw: Option<&str>) -> Option<Duration> {
    let raw = raw?.trim();
    match humantime::parse_duration(raw) {
        Ok(interval) if !interval.is_zero() => Some(interval),
        Ok(_) => None,
        Err(e) => {
            warn!(value = raw, error = %e, "Ignoring invalid {POLL_INTERVAL_ENV}");
            None
        }
    }
}

// ============================================================================
// RemoteChange
// ============================================================================

/// Classification of a remote change
///
/// The feed does not say whether a file is new or merely updated, so live
/// files are reported as `Modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOp::Create => "create",
            ChangeOp::Modify => "modify",
            ChangeOp::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// One classified change under the watched folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub remote_id: RemoteId,
    /// Empty when the feed carried no file body
    pub name: String,
    pub mime_type: Option<String>,
    pub is_folder: bool,
    pub parents: Vec<RemoteId>,
    pub op: ChangeOp,
    /// The object is gone or in the trash
    pub removed: bool,
    pub md5: Option<ContentHash>,
    pub modified: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl RemoteChange {
    fn classify(change: FeedChange) -> Self {
        let timestamp = change.time.unwrap_or_else(Utc::now);
        match change.file {
            None => Self {
                remote_id: change.remote_id,
                name: String::new(),
                mime_type: None,
                is_folder: false,
                parents: Vec::new(),
                op: ChangeOp::Delete,
                removed: true,
                md5: None,
                modified: None,
                timestamp,
            },
            Some(file) => {
                let removed = change.removed || file.trashed;
                Self {
                    remote_id: change.remote_id,
                    is_folder: file.mime_type.as_deref() == Some(FOLDER_MIME_TYPE),
                    name: file.name,
                    mime_type: file.mime_type,
                    parents: file.parents,
                    op: if removed { ChangeOp::Delete } else { ChangeOp::Modify },
                    removed,
                    md5: file.md5,
                    modified: file.modified,
                    timestamp,
                }
            }
        }
    }
}

/// Changes from one tick, waiting for the engine's acknowledgement
#[derive(Debug)]
pub struct ChangeBatch {
    pub changes: Vec<RemoteChange>,
    ack: oneshot::Sender<()>,
}

impl ChangeBatch {
    /// Confirms the batch was processed; the poller may now advance the cursor
    pub fn ack(self) {
        let _ = self.ack.send(());
    }
}

// ============================================================================
// RemotePoller
// ============================================================================

/// Polls the change feed for one sync configuration
pub struct RemotePoller {
    feed: Arc<dyn IRemoteChangeFeed>,
    store: Arc<dyn ISyncStateStore>,
    config_id: ConfigId,
    folders: Arc<FolderCache>,
    interval: Duration,
    errors: Arc<BoundedQueue<anyhow::Error>>,
}

impl RemotePoller {
    /// Creates a poller for the folder tree rooted at `folders.root()`
    ///
    /// Changes are kept when one of their parents is the watched folder or
    /// a folder already known to `folders`.
    pub fn new(
        feed: Arc<dyn IRemoteChangeFeed>,
        store: Arc<dyn ISyncStateStore>,
        config_id: ConfigId,
        folders: Arc<FolderCache>,
        interval: Duration,
    ) -> Self {
        Self {
            feed,
            store,
            config_id,
            folders,
            interval: interval.max(MIN_POLL_INTERVAL),
            errors: Arc::new(BoundedQueue::new(ERROR_CAPACITY, Overflow::DropNewest)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick failures, for the engine to log
    pub fn errors(&self) -> Arc<BoundedQueue<anyhow::Error>> {
        Arc::clone(&self.errors)
    }

    /// Returns the persisted cursor, or obtains and persists a fresh one
    ///
    /// # Errors
    /// Returns an error if the configuration is missing, or no cursor can be
    /// obtained or stored
    pub async fn initialize(&self) -> Result<ChangeCursor> {
        let config = self
            .store
            .get_config_by_id(self.config_id)
            .await
            .context("Failed to load sync configuration")?
            .ok_or_else(|| anyhow!("Sync configuration {} not found", self.config_id))?;

        if let Some(cursor) = config.change_token() {
            debug!(config_id = %self.config_id, cursor = %cursor, "Resuming from stored cursor");
            return Ok(cursor.clone());
        }

        let cursor = self
            .feed
            .get_start_cursor()
            .await
            .context("Failed to obtain start cursor")?;
        self.store
            .update_change_token(self.config_id, &cursor)
            .await
            .context("Failed to persist start cursor")?;

        info!(config_id = %self.config_id, cursor = %cursor, "Obtained start cursor");
        Ok(cursor)
    }

    /// Fetches every page since `cursor` and returns the relevant changes
    /// with the cursor to continue from
    ///
    /// # Errors
    /// Returns an error if any page request fails; nothing is kept from a
    /// partially fetched run
    pub async fn poll_once(
        &self,
        cursor: &ChangeCursor,
    ) -> Result<(Vec<RemoteChange>, ChangeCursor)> {
        let mut raw = Vec::new();
        let mut current = cursor.clone();

        loop {
            let page = self
                .feed
                .list_changes_since(&current)
                .await
                .with_context(|| format!("Failed to list changes since {current}"))?;
            raw.extend(page.changes);
            current = page.next_cursor;
            if !page.has_more {
                break;
            }
        }

        let fetched = raw.len();
        let changes = self.filter(raw);
        debug!(
            config_id = %self.config_id,
            fetched,
            relevant = changes.len(),
            "Polled change feed"
        );
        Ok((changes, current))
    }

    /// Keeps changes under the watched tree
    ///
    /// Folders accepted earlier in the same run count as known parents, so
    /// a new folder and its contents arrive together. Changes without a
    /// file body cannot be placed and are passed through.
    fn filter(&self, raw: Vec<FeedChange>) -> Vec<RemoteChange> {
        let mut accepted_folders: HashSet<RemoteId> = HashSet::new();

        raw.into_iter()
            .map(RemoteChange::classify)
            .filter(|change| {
                if change.parents.is_empty() {
                    return change.removed;
                }
                let inside = change.parents.iter().any(|parent| {
                    self.folders.contains_id(parent) || accepted_folders.contains(parent)
                });
                if inside && change.is_folder && !change.removed {
                    accepted_folders.insert(change.remote_id.clone());
                }
                inside
            })
            .collect()
    }

    /// Polls until cancelled, sending each non-empty batch to `tx`
    ///
    /// Tick failures go to [`errors`](Self::errors) and are retried on the
    /// next tick. A batch dropped without acknowledgement leaves the cursor
    /// where it was.
    ///
    /// # Errors
    /// Returns an error only if the initial cursor cannot be obtained
    pub async fn run(
        &self,
        tx: mpsc::Sender<ChangeBatch>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let cursor = self.initialize().await?;
        self.run_from(cursor, tx, cancel).await
    }

    /// Like [`run`](Self::run) but starting from an already initialized cursor
    pub async fn run_from(
        &self,
        mut cursor: ChangeCursor,
        tx: mpsc::Sender<ChangeBatch>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            config_id = %self.config_id,
            interval_ms = self.interval.as_millis() as u64,
            "Remote poller started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let (changes, next) = match self.poll_once(&cursor).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(config_id = %self.config_id, error = %format!("{err:#}"), "Poll failed, retrying next tick");
                    self.errors.push(err);
                    continue;
                }
            };

            if !changes.is_empty() {
                let count = changes.len();
                let (ack_tx, ack_rx) = oneshot::channel();
                let batch = ChangeBatch {
                    changes,
                    ack: ack_tx,
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(batch) => {
                        if sent.is_err() {
                            debug!("Change consumer gone, stopping poller");
                            break;
                        }
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    acked = ack_rx => {
                        if acked.is_err() {
                            warn!(count, "Change batch dropped without acknowledgement, cursor kept");
                            continue;
                        }
                    }
                }
                debug!(count, "Change batch acknowledged");
            }

            if next != cursor {
                if let Err(err) = self.store.update_change_token(self.config_id, &next).await {
                    warn!(config_id = %self.config_id, error = %err, "Failed to persist change cursor");
                    self.errors
                        .push(err.context("Failed to persist change cursor"));
                }
                cursor = next;
            }
        }

        info!(config_id = %self.config_id, "Remote poller stopped");
        Ok(())
    }
}
