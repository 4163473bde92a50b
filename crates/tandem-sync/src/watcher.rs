//! Local change detection with per-path debounce
//!
//! [`LocalWatcher`] wraps the `notify` crate, registers one watch per
//! directory under the sync root, and turns raw OS events into
//! [`WatchEvent`] values. Events for the same path are coalesced in a
//! [`DebounceArena`]: the latest operation wins and the quiet-period timer
//! restarts, so a burst of writes becomes one event.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue / fsevents
//!       │  (notify callback thread)
//!       ▼
//!  unbounded raw channel ──→ watcher loop ──→ DebounceArena
//!                                │                 │ earliest deadline
//!                                ▼                 ▼
//!                         error queue (10)   event queue (100, drop-oldest)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::ignore::is_ignored;
use crate::queue::{BoundedQueue, Overflow};

/// Default capacity of the debounced event queue
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Capacity of the error queue
pub const ERROR_CAPACITY: usize = 10;

// ============================================================================
// WatchOp / WatchEvent
// ============================================================================

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchOp {
    Create,
    Write,
    Delete,
    /// The path was moved away; the destination arrives as a `Create`
    Rename,
}

impl fmt::Display for WatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchOp::Create => "create",
            WatchOp::Write => "write",
            WatchOp::Delete => "delete",
            WatchOp::Rename => "rename",
        };
        write!(f, "{s}")
    }
}

/// A debounced change to one path under the sync root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated
    pub rel_path: String,
    pub op: WatchOp,
    /// Time of the last raw event folded into this one
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// DebounceArena
// ============================================================================

#[derive(Debug, Clone)]
struct PendingEntry {
    rel_path: String,
    op: WatchOp,
    seen_at: DateTime<Utc>,
    deadline: Instant,
}

/// Pending per-path events waiting out their quiet period
///
/// Pushing an event for a path that is already pending replaces its
/// operation and restarts its deadline.
#[derive(Debug)]
pub struct DebounceArena {
    pending: HashMap<PathBuf, PendingEntry>,
    window: Duration,
}

impl DebounceArena {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    /// Inserts or replaces the pending event for `path`
    pub fn push(&mut self, path: PathBuf, rel_path: String, op: WatchOp) {
        trace!(path = %path.display(), %op, "Debouncing change");
        self.pending.insert(
            path,
            PendingEntry {
                rel_path,
                op,
                seen_at: Utc::now(),
                deadline: Instant::now() + self.window,
            },
        );
    }

    /// Removes and returns every event whose quiet period has elapsed
    pub fn take_expired(&mut self, now: Instant) -> Vec<WatchEvent> {
        let expired: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|path| {
                self.pending.remove(&path).map(|entry| WatchEvent {
                    path,
                    rel_path: entry.rel_path,
                    op: entry.op,
                    timestamp: entry.seen_at,
                })
            })
            .collect()
    }

    /// The earliest deadline among pending events
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// LocalWatcher
// ============================================================================

type RawEvent = std::result::Result<notify::Event, notify::Error>;

/// Watches a sync root and emits debounced [`WatchEvent`]s
///
/// ## Usage
///
/// ```ignore
/// let watcher = Arc::new(LocalWatcher::new("/home/user/Sync", Duration::from_millis(500))?);
/// let events = watcher.events();
/// tokio::spawn({
///     let watcher = Arc::clone(&watcher);
///     async move { watcher.start(cancel).await }
/// });
/// while let Some(event) = events.recv().await { /* ... */ }
/// ```
pub struct LocalWatcher {
    root: PathBuf,
    debounce: Duration,
    watcher: Mutex<Option<RecommendedWatcher>>,
    raw_rx: Mutex<Option<mpsc::UnboundedReceiver<RawEvent>>>,
    arena: Mutex<DebounceArena>,
    events: Arc<BoundedQueue<WatchEvent>>,
    errors: Arc<BoundedQueue<anyhow::Error>>,
    stop_token: CancellationToken,
    stopped: AtomicBool,
}

impl LocalWatcher {
    /// Creates a watcher over `root` with the default event queue capacity
    ///
    /// # Errors
    /// See [`with_capacity`](Self::with_capacity)
    pub fn new(root: impl AsRef<Path>, debounce: Duration) -> Result<Self> {
        Self::with_capacity(root, debounce, DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a watcher and registers every directory under `root`
    ///
    /// Subtrees that cannot be read or watched because of permissions are
    /// skipped with a warning.
    ///
    /// # Errors
    /// Returns an error if the root does not exist, is not a directory, or
    /// the OS watcher cannot be created or registered
    pub fn with_capacity(
        root: impl AsRef<Path>,
        debounce: Duration,
        capacity: usize,
    ) -> Result<Self> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("Cannot access watch root {}", root.display()))?;
        if !root.is_dir() {
            bail!("Watch root is not a directory: {}", root.display());
        }
        std::fs::read_dir(&root)
            .with_context(|| format!("Cannot read watch root {}", root.display()))?;

        info!(
            root = %root.display(),
            debounce_ms = debounce.as_millis() as u64,
            "Initializing local watcher"
        );

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let mut watcher = RecommendedWatcher::new(
            move |res: RawEvent| {
                // The receiver only goes away after stop()
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        let mut discovered = Vec::new();
        register_tree(&mut watcher, &root, &root, &mut discovered)?;
        debug!(
            root = %root.display(),
            files = discovered.len(),
            "Registered watches"
        );

        Ok(Self {
            root,
            debounce,
            watcher: Mutex::new(Some(watcher)),
            raw_rx: Mutex::new(Some(raw_rx)),
            arena: Mutex::new(DebounceArena::new(debounce)),
            events: Arc::new(BoundedQueue::new(capacity, Overflow::DropOldest)),
            errors: Arc::new(BoundedQueue::new(ERROR_CAPACITY, Overflow::DropNewest)),
            stop_token: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Canonical absolute root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Debounced events, oldest first
    pub fn events(&self) -> Arc<BoundedQueue<WatchEvent>> {
        Arc::clone(&self.events)
    }

    /// Non-fatal errors raised while running
    pub fn errors(&self) -> Arc<BoundedQueue<anyhow::Error>> {
        Arc::clone(&self.errors)
    }

    /// Events lost to queue overflow
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Paths still inside their debounce window
    pub fn pending_count(&self) -> usize {
        self.arena().len()
    }

    /// Runs the event loop until `cancel` fires or [`stop`](Self::stop) is called
    ///
    /// # Errors
    /// Returns an error if the watcher was already started or stopped
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            bail!("Watcher for {} has been stopped", self.root.display());
        }
        let mut raw_rx = lock(&self.raw_rx)
            .take()
            .ok_or_else(|| anyhow!("Watcher for {} already started", self.root.display()))?;

        info!(root = %self.root.display(), "Local watcher started");

        loop {
            let deadline = self.arena().next_deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.stop_token.cancelled() => break,
                raw = raw_rx.recv() => match raw {
                    Some(Ok(event)) => self.handle_raw(&event),
                    Some(Err(err)) => {
                        error!(error = %err, "File watcher error");
                        self.report(anyhow::Error::new(err).context("file watcher error"));
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => self.flush_expired(),
            }
        }

        self.stop();
        info!(root = %self.root.display(), "Local watcher stopped");
        Ok(())
    }

    /// Releases watch handles, drops pending events and closes the queues
    ///
    /// Safe to call more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_token.cancel();
        lock(&self.watcher).take();
        self.arena().clear();
        self.events.close();
        self.errors.close();
        debug!(root = %self.root.display(), "Watcher resources released");
    }

    fn handle_raw(&self, event: &notify::Event) {
        for (path, op) in map_notify_event(event) {
            let Some(rel_path) = relative_to(&self.root, &path) else {
                continue;
            };
            if is_ignored(&rel_path) {
                trace!(path = %rel_path, "Ignoring change");
                continue;
            }

            if op == WatchOp::Create && path.is_dir() {
                self.watch_new_directory(&path);
            }

            self.arena().push(path, rel_path, op);
        }
    }

    /// Registers a directory that appeared after startup
    ///
    /// Files already inside it were created before the watch existed, so
    /// they are queued as creations too.
    fn watch_new_directory(&self, dir: &Path) {
        let mut discovered = Vec::new();
        let result = match lock(&self.watcher).as_mut() {
            Some(watcher) => register_tree(watcher, &self.root, dir, &mut discovered),
            None => return,
        };

        if let Err(err) = result {
            warn!(path = %dir.display(), error = %err, "Failed to watch new directory");
            self.report(err);
        }

        let mut arena = self.arena();
        for path in discovered {
            if let Some(rel_path) = relative_to(&self.root, &path) {
                arena.push(path, rel_path, WatchOp::Create);
            }
        }
    }

    fn flush_expired(&self) {
        let expired = self.arena().take_expired(Instant::now());
        for event in expired {
            debug!(path = %event.rel_path, op = %event.op, "Emitting change");
            if !self.events.push(event) {
                warn!(
                    dropped = self.events.dropped(),
                    "Event queue full, dropped oldest event"
                );
            }
        }
    }

    fn report(&self, err: anyhow::Error) {
        if !self.errors.push(err) {
            debug!("Watcher error queue full, error discarded");
        }
    }

    fn arena(&self) -> MutexGuard<'_, DebounceArena> {
        lock(&self.arena)
    }
}

impl Drop for LocalWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// `/`-separated path of `path` under `root`; `None` for the root itself
/// or anything outside it
fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    (!joined.is_empty()).then_some(joined)
}

// ============================================================================
// Watch registration
// ============================================================================

/// Watches `start` and every directory below it, collecting regular files
///
/// Ignored directories are not descended into. Permission problems skip
/// the affected subtree; a directory that disappeared mid-walk is skipped
/// silently.
fn register_tree(
    watcher: &mut RecommendedWatcher,
    root: &Path,
    start: &Path,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut stack = vec![start.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if let Some(rel) = relative_to(root, &dir) {
            if is_ignored(&rel) {
                continue;
            }
        }

        if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            match &err.kind {
                notify::ErrorKind::Io(io_err) if io_err.kind() == io::ErrorKind::PermissionDenied => {
                    warn!(path = %dir.display(), "Permission denied, skipping subtree");
                    continue;
                }
                notify::ErrorKind::PathNotFound => continue,
                notify::ErrorKind::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {
                    continue
                }
                _ => return Err(err).with_context(|| format!("Failed to watch {}", dir.display())),
            }
        }

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                warn!(path = %dir.display(), "Cannot list directory, skipping subtree");
                continue;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to list {}", dir.display()))
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Some(rel) = relative_to(root, &path) {
                    if !is_ignored(&rel) {
                        files.push(path);
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Event mapping - notify::Event → (path, WatchOp)
// ============================================================================

/// Converts a raw `notify::Event` into per-path operations
///
/// - `Create(*)` -> `Create`
/// - `Modify(Name(Both))` -> `Rename` for the source, `Create` for the target
/// - `Modify(Name(From))` -> `Rename`; `Modify(Name(To))` -> `Create`
/// - `Modify(*)` otherwise -> `Write`
/// - `Remove(*)` -> `Delete`
///
/// Access and unknown events map to nothing.
fn map_notify_event(event: &notify::Event) -> Vec<(PathBuf, WatchOp)> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => paths.iter().map(|p| (p.clone(), WatchOp::Create)).collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.as_slice() {
            [from, to, ..] => vec![(from.clone(), WatchOp::Rename), (to.clone(), WatchOp::Create)],
            [only] => vec![(only.clone(), WatchOp::Write)],
            [] => Vec::new(),
        },

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().map(|p| (p.clone(), WatchOp::Rename)).collect()
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().map(|p| (p.clone(), WatchOp::Create)).collect()
        }

        EventKind::Modify(_) => paths.iter().map(|p| (p.clone(), WatchOp::Write)).collect(),

        EventKind::Remove(_) => paths.iter().map(|p| (p.clone(), WatchOp::Delete)).collect(),

        _ => {
            trace!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: EventKind, paths: &[&str]) -> notify::Event {
        notify::Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    // ------------------------------------------------------------------
    // Event mapping
    // ------------------------------------------------------------------

    #[test]
    fn test_map_create_event() {
        let event = raw(EventKind::Create(notify::event::CreateKind::File), &["/r/a.txt"]);
        assert_eq!(
            map_notify_event(&event),
            vec![(PathBuf::from("/r/a.txt"), WatchOp::Create)]
        );
    }

    #[test]
    fn test_map_modify_data_event() {
        let event = raw(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            &["/r/a.txt"],
        );
        assert_eq!(
            map_notify_event(&event),
            vec![(PathBuf::from("/r/a.txt"), WatchOp::Write)]
        );
    }

    #[test]
    fn test_map_rename_both_splits_into_two_ops() {
        let event = raw(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/r/old.txt", "/r/new.txt"],
        );
        assert_eq!(
            map_notify_event(&event),
            vec![
                (PathBuf::from("/r/old.txt"), WatchOp::Rename),
                (PathBuf::from("/r/new.txt"), WatchOp::Create),
            ]
        );
    }

    #[test]
    fn test_map_rename_halves() {
        let from = raw(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/r/a"]);
        let to = raw(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/r/b"]);
        assert_eq!(map_notify_event(&from), vec![(PathBuf::from("/r/a"), WatchOp::Rename)]);
        assert_eq!(map_notify_event(&to), vec![(PathBuf::from("/r/b"), WatchOp::Create)]);
    }

    #[test]
    fn test_map_remove_event() {
        let event = raw(EventKind::Remove(notify::event::RemoveKind::File), &["/r/a.txt"]);
        assert_eq!(
            map_notify_event(&event),
            vec![(PathBuf::from("/r/a.txt"), WatchOp::Delete)]
        );
    }

    #[test]
    fn test_map_access_event_ignored() {
        let event = raw(EventKind::Access(notify::event::AccessKind::Read), &["/r/a.txt"]);
        assert!(map_notify_event(&event).is_empty());
    }

    #[test]
    fn test_map_event_no_paths() {
        let event = raw(EventKind::Create(notify::event::CreateKind::File), &[]);
        assert!(map_notify_event(&event).is_empty());
    }

    #[test]
    fn test_watch_op_display() {
        assert_eq!(WatchOp::Create.to_string(), "create");
        assert_eq!(WatchOp::Write.to_string(), "write");
        assert_eq!(WatchOp::Delete.to_string(), "delete");
        assert_eq!(WatchOp::Rename.to_string(), "rename");
    }

    #[test]
    fn test_relative_to() {
        let root = Path::new("/sync");
        assert_eq!(relative_to(root, Path::new("/sync/a/b.txt")).as_deref(), Some("a/b.txt"));
        assert_eq!(relative_to(root, Path::new("/sync")), None);
        assert_eq!(relative_to(root, Path::new("/elsewhere/a")), None);
    }

    // ------------------------------------------------------------------
    // DebounceArena
    // ------------------------------------------------------------------

    fn push(arena: &mut DebounceArena, name: &str, op: WatchOp) {
        arena.push(PathBuf::from(format!("/r/{name}")), name.to_string(), op);
    }

    #[test]
    fn test_push_coalesces_same_path() {
        let mut arena = DebounceArena::new(Duration::from_millis(100));
        push(&mut arena, "a.txt", WatchOp::Create);
        push(&mut arena, "a.txt", WatchOp::Write);
        push(&mut arena, "b.txt", WatchOp::Write);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_latest_op_wins() {
        let mut arena = DebounceArena::new(Duration::ZERO);
        push(&mut arena, "a.txt", WatchOp::Create);
        push(&mut arena, "a.txt", WatchOp::Write);
        push(&mut arena, "a.txt", WatchOp::Delete);

        let settled = arena.take_expired(Instant::now());
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].op, WatchOp::Delete);
        assert_eq!(settled[0].rel_path, "a.txt");
        assert!(arena.is_empty());
    }

    #[test]
    fn test_recent_events_are_not_expired() {
        let mut arena = DebounceArena::new(Duration::from_secs(60));
        push(&mut arena, "a.txt", WatchOp::Write);
        assert!(arena.take_expired(Instant::now()).is_empty());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_partial_settlement() {
        let mut arena = DebounceArena::new(Duration::from_millis(50));
        push(&mut arena, "old.txt", WatchOp::Create);
        std::thread::sleep(Duration::from_millis(60));
        push(&mut arena, "new.txt", WatchOp::Create);

        let settled = arena.take_expired(Instant::now());
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].rel_path, "old.txt");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_push_restarts_deadline() {
        let mut arena = DebounceArena::new(Duration::from_millis(50));
        push(&mut arena, "a.txt", WatchOp::Create);
        let first = arena.next_deadline().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        push(&mut arena, "a.txt", WatchOp::Write);
        let second = arena.next_deadline().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut arena = DebounceArena::new(Duration::from_millis(50));
        assert!(arena.next_deadline().is_none());
        push(&mut arena, "a.txt", WatchOp::Write);
        let first = arena.next_deadline().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        push(&mut arena, "b.txt", WatchOp::Write);
        assert_eq!(arena.next_deadline(), Some(first));
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    #[test]
    fn test_new_rejects_missing_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = LocalWatcher::new(dir.path().join("missing"), Duration::from_millis(10));
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rejects_file_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(LocalWatcher::new(&file, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let watcher = LocalWatcher::new(dir.path(), Duration::from_millis(10)).unwrap();
        watcher.stop();
        watcher.stop();
        assert!(watcher.events().is_closed());
        assert_eq!(watcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_start_after_stop_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let watcher = LocalWatcher::new(dir.path(), Duration::from_millis(10)).unwrap();
        watcher.stop();
        assert!(watcher.start(CancellationToken::new()).await.is_err());
    }
}
