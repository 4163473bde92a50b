//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ISyncStateStore`] - Persistent configurations, sync items and sync log
//! - [`IRemoteObjectStore`] - Raw object API of the remote store
//! - [`IRemoteContentStore`] - Path-oriented upload/download/folder/delete
//! - [`IRemoteChangeFeed`] - Incremental remote change feed

pub mod change_feed;
pub mod remote_store;
pub mod state_store;

pub use change_feed::{ChangePage, FeedChange, FeedFile, IRemoteChangeFeed};
pub use remote_store::{
    DownloadOutcome, IRemoteContentStore, IRemoteObjectStore, RemoteError, RemoteObject,
    UploadOutcome,
};
pub use state_store::ISyncStateStore;
