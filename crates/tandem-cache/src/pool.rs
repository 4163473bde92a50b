//! Connection pool for the state database
//!
//! File databases run in WAL mode with a busy timeout so the engine and the
//! CLI can open the same file at once. The schema is applied on every open.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::CacheError;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const SCHEMA: &str = include_str!("migrations/20260203_initial.sql");

/// Owned SQLite pool with the schema applied
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the database file at `db_path`
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    /// Returns [`CacheError::CreateDir`], [`CacheError::Open`] or
    /// [`CacheError::Migration`].
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = connect_options(SqliteConnectOptions::new().filename(db_path))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| CacheError::Open {
                path: db_path.to_path_buf(),
                source,
            })?;

        apply_schema(&pool).await?;
        info!(path = %db_path.display(), "State database opened");
        Ok(Self { pool })
    }

    /// Private in-memory database
    ///
    /// An in-memory SQLite database lives and dies with its connection, so
    /// the pool is pinned to one.
    ///
    /// # Errors
    /// Returns [`CacheError::Open`] or [`CacheError::Migration`].
    pub async fn in_memory() -> Result<Self, CacheError> {
        let open_err = |source| CacheError::Open {
            path: ":memory:".into(),
            source,
        };
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(open_err)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options(options))
            .await
            .map_err(open_err)?;

        apply_schema(&pool).await?;
        debug!("In-memory state database opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every connection, checkpointing the WAL
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Settings shared by file and in-memory databases
fn connect_options(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options.foreign_keys(true).busy_timeout(BUSY_TIMEOUT)
}

/// The schema script only uses `IF NOT EXISTS`
async fn apply_schema(pool: &SqlitePool) -> Result<(), CacheError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(CacheError::Migration)?;
    debug!("Schema applied");
    Ok(())
}
