//! Tandem Sync - bidirectional synchronization runtime
//!
//! Provides:
//! - A debounced, recursive local watcher
//! - A cursor-based remote change poller
//! - The per-configuration sync engine that reconciles both sides
//! - A remote content adapter over a low-level object store
//!
//! ## Modules
//!
//! - [`engine`] - Event loop, initial scan and pending-upload sweep
//! - [`watcher`] - Local change detection with per-path debounce
//! - [`poller`] - Incremental remote change detection
//! - [`remote`] - Content adapter and the in-memory remote backend
//! - [`ignore`] - Paths that never take part in sync
//! - [`queue`] - Bounded queue with drop-oldest overflow

pub mod engine;
pub mod folder_cache;
pub mod ignore;
pub mod poller;
pub mod queue;
pub mod remote;
pub mod watcher;

pub use engine::{EngineOptions, ScanReport, ShutdownReason, SweepReport, SyncEngine};
pub use folder_cache::FolderCache;
pub use poller::{default_poll_interval, ChangeBatch, ChangeOp, RemoteChange, RemotePoller};
pub use watcher::{LocalWatcher, WatchEvent, WatchOp};

use thiserror::Error;

/// Errors that stop an engine from starting or running
#[derive(Debug, Error)]
pub enum SyncError {
    /// `start` was called while the engine was already running
    #[error("sync engine is already running")]
    AlreadyRunning,

    /// The local watcher could not be constructed or started
    #[error("local watcher failed: {0:#}")]
    Watcher(anyhow::Error),

    /// No starting cursor could be obtained from the change feed
    #[error("could not obtain initial change cursor: {0:#}")]
    InitialCursor(anyhow::Error),

    /// The initial walk of the local tree failed
    #[error("initial scan failed: {0:#}")]
    InitialScan(anyhow::Error),

    /// The run was cancelled before it completed
    #[error("sync cancelled")]
    Cancelled,
}
