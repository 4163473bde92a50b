//! Tandem Cache - SQLite persistence for sync state
//!
//! Implements the `ISyncStateStore` port from `tandem-core`. One database
//! holds every sync configuration, the per-file items of each, and the
//! append-only sync log.
//!
//! ```no_run
//! use std::path::Path;
//! use tandem_cache::{DatabasePool, SqliteStateStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/tandem/state.db")).await?;
//! let store = SqliteStateStore::new(pool.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

use std::path::PathBuf;

pub use pool::DatabasePool;
pub use repository::SqliteStateStore;

/// Failures of the state database
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cannot open state database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot create directory for state database {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema migration failed: {0}")]
    Migration(#[source] sqlx::Error),

    #[error(transparent)]
    Query(#[from] sqlx::Error),

    /// A stored column no longer parses into its domain type
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("not found: {0}")]
    NotFound(String),
}
