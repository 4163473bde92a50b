//! Remote change feed port (driven/secondary port)
//!
//! An incremental feed of remote changes addressed by an opaque cursor.
//! A page either carries a continuation cursor (`has_more`) or the cursor
//! to resume from on the next poll.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::{ChangeCursor, ContentHash, RemoteId};
use crate::ports::remote_store::RemoteError;

/// One raw change as reported by the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedChange {
    pub remote_id: RemoteId,
    /// The object is gone (no body available)
    pub removed: bool,
    /// Object body at the time of the change; `None` when removed
    pub file: Option<FeedFile>,
    pub time: Option<DateTime<Utc>>,
}

/// Object fields carried by a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub parents: Vec<RemoteId>,
    pub trashed: bool,
    pub md5: Option<ContentHash>,
    pub modified: Option<DateTime<Utc>>,
}

/// One page of changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePage {
    pub changes: Vec<FeedChange>,
    /// Cursor for the next request
    pub next_cursor: ChangeCursor,
    /// More pages are available right now at `next_cursor`
    pub has_more: bool,
}

/// Port for reading the remote change feed
#[async_trait::async_trait]
pub trait IRemoteChangeFeed: Send + Sync {
    /// A cursor representing "now"
    async fn get_start_cursor(&self) -> Result<ChangeCursor, RemoteError>;

    async fn list_changes_since(&self, cursor: &ChangeCursor) -> Result<ChangePage, RemoteError>;
}
