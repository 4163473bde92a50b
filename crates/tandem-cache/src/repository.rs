//! SQLite implementation of ISyncStateStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! sync state port defined in tandem-core. It handles all domain type
//! serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type         | SQL Type | Strategy                                       |
//! |---------------------|----------|------------------------------------------------|
//! | ConfigId, ItemId    | INTEGER  | Row id via `as_i64()` / `From<i64>`            |
//! | RelativePath        | TEXT     | Forward-slash string / `RelativePath::new()`   |
//! | RemoteId            | TEXT     | String, `''` when absent                       |
//! | ContentHash         | TEXT     | Lowercase hex, `''` when absent                |
//! | ChangeCursor        | TEXT     | String, `''` when absent                       |
//! | DateTime<Utc>       | TEXT     | RFC 3339 via `to_rfc3339()` / `parse_datetime` |
//! | SyncState           | TEXT     | snake_case name via `as_str()` / `FromStr`     |
//! | SyncAction          | TEXT     | snake_case name via `as_str()` / `FromStr`     |
//! | log details         | TEXT     | JSON object                                    |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use tandem_core::domain::{
    newtypes::{ChangeCursor, ConfigId, ContentHash, ItemId, LogEntryId, RelativePath, RemoteId},
    NewSyncConfig, NewSyncLogEntry, SyncAction, SyncConfig, SyncItem, SyncItemParts,
    SyncLogEntry, SyncState, SyncStatus,
};
use tandem_core::ports::ISyncStateStore;

use crate::CacheError;

/// SQLite-based implementation of the sync state port
///
/// All operations are performed through a connection pool for concurrency.
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn require_config(&self, id: ConfigId) -> Result<SyncConfig, CacheError> {
        let row = sqlx::query("SELECT * FROM sync_configs WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => config_from_row(&row),
            None => Err(CacheError::NotFound(format!("sync configuration {id}"))),
        }
    }

    async fn count_states(&self, id: ConfigId) -> Result<HashMap<SyncState, u64>, CacheError> {
        let rows = sqlx::query(
            "SELECT sync_state, COUNT(*) AS n FROM sync_items \
             WHERE config_id = ? GROUP BY sync_state",
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let state_str: String = row.get("sync_state");
            let n: i64 = row.get("n");
            counts.insert(parse_state(&state_str)?, n as u64);
        }
        Ok(counts)
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Format a timestamp for storage
///
/// Fixed-width microsecond precision keeps lexical and time order aligned.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try parsing without timezone (SQLite default format)
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            CacheError::CorruptRow(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

/// Columns that use `''` for "absent"
fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

fn parse_state(s: &str) -> Result<SyncState, CacheError> {
    SyncState::from_str(s).map_err(|e| CacheError::CorruptRow(e.to_string()))
}

fn parse_remote_id(s: Option<String>) -> Result<Option<RemoteId>, CacheError> {
    non_empty(s)
        .map(|v| {
            RemoteId::new(v.clone()).map_err(|e| {
                CacheError::CorruptRow(format!("Invalid RemoteId '{}': {}", v, e))
            })
        })
        .transpose()
}

fn parse_hash(s: Option<String>) -> Result<Option<ContentHash>, CacheError> {
    non_empty(s)
        .map(|v| {
            ContentHash::new(v.clone()).map_err(|e| {
                CacheError::CorruptRow(format!("Invalid ContentHash '{}': {}", v, e))
            })
        })
        .transpose()
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a SyncConfig from a database row
fn config_from_row(row: &SqliteRow) -> Result<SyncConfig, CacheError> {
    let id: i64 = row.get("id");
    let local_path: String = row.get("local_path");
    let remote_folder_id: String = row.get("remote_folder_id");
    let remote_container_id: Option<String> = row.get("remote_container_id");
    let created_at_str: String = row.get("created_at");
    let last_sync_at_str: Option<String> = row.get("last_sync_at");
    let change_token_str: Option<String> = row.get("change_token");

    let folder = RemoteId::new(remote_folder_id.clone()).map_err(|e| {
        CacheError::CorruptRow(format!(
            "Invalid remote folder id '{}': {}",
            remote_folder_id, e
        ))
    })?;
    let new = NewSyncConfig::new(PathBuf::from(&local_path), folder, non_empty(remote_container_id))
        .map_err(|e| CacheError::CorruptRow(e.to_string()))?;

    let change_token = non_empty(change_token_str)
        .map(ChangeCursor::new)
        .transpose()
        .map_err(|e| CacheError::CorruptRow(e.to_string()))?;

    Ok(SyncConfig::restore(
        ConfigId::new(id),
        new,
        parse_datetime(&created_at_str)?,
        parse_optional_datetime(last_sync_at_str)?,
        change_token,
    ))
}

/// Reconstruct a SyncItem from a database row
fn sync_item_from_row(row: &SqliteRow) -> Result<SyncItem, CacheError> {
    let id: i64 = row.get("id");
    let config_id: i64 = row.get("config_id");
    let local_path_str: String = row.get("local_path");
    let remote_id_str: Option<String> = row.get("remote_id");
    let local_md5_str: Option<String> = row.get("local_md5");
    let remote_md5_str: Option<String> = row.get("remote_md5");
    let local_mtime_str: Option<String> = row.get("local_mtime");
    let remote_mtime_str: Option<String> = row.get("remote_mtime");
    let state_str: String = row.get("sync_state");

    let local_path = RelativePath::new(local_path_str.clone()).map_err(|e| {
        CacheError::CorruptRow(format!("Invalid local path '{}': {}", local_path_str, e))
    })?;

    Ok(SyncItem::from_parts(SyncItemParts {
        id: ItemId::new(id),
        config_id: ConfigId::new(config_id),
        local_path,
        remote_id: parse_remote_id(remote_id_str)?,
        local_md5: parse_hash(local_md5_str)?,
        remote_md5: parse_hash(remote_md5_str)?,
        local_mtime: parse_optional_datetime(local_mtime_str)?,
        remote_mtime: parse_optional_datetime(remote_mtime_str)?,
        state: parse_state(&state_str)?,
    }))
}

/// Reconstruct a SyncLogEntry from a database row
fn log_entry_from_row(row: &SqliteRow) -> Result<SyncLogEntry, CacheError> {
    let id: i64 = row.get("id");
    let config_id: i64 = row.get("config_id");
    let action_str: String = row.get("action");
    let path: String = row.get("path");
    let timestamp_str: String = row.get("timestamp");
    let details_str: String = row.get("details");

    let action = SyncAction::from_str(&action_str)
        .map_err(|e| CacheError::CorruptRow(e.to_string()))?;
    let details: serde_json::Value = serde_json::from_str(&details_str).unwrap_or_default();

    Ok(SyncLogEntry {
        id: LogEntryId::new(id),
        config_id: ConfigId::new(config_id),
        action,
        path,
        timestamp: parse_datetime(&timestamp_str)?,
        details,
    })
}

// ============================================================================
// ISyncStateStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ISyncStateStore for SqliteStateStore {
    // --- SyncConfig operations ---

    async fn create_config(&self, config: &NewSyncConfig) -> anyhow::Result<SyncConfig> {
        let local_path = config.local_path().to_string_lossy().to_string();
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO sync_configs \
             (local_path, remote_folder_id, remote_container_id, created_at, last_sync_at, change_token) \
             VALUES (?, ?, ?, ?, NULL, '')",
        )
        .bind(&local_path)
        .bind(config.remote_folder_id().as_str())
        .bind(config.remote_container_id().unwrap_or(""))
        .bind(format_datetime(created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create sync configuration for {local_path}"))?;

        let id = ConfigId::new(result.last_insert_rowid());
        tracing::debug!(config_id = %id, local_path = %local_path, "Created sync configuration");

        Ok(SyncConfig::restore(id, config.clone(), created_at, None, None))
    }

    async fn get_config(&self, local_path: &Path) -> anyhow::Result<Option<SyncConfig>> {
        let row = sqlx::query("SELECT * FROM sync_configs WHERE local_path = ?")
            .bind(local_path.to_string_lossy().as_ref())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(config_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_config_by_id(&self, id: ConfigId) -> anyhow::Result<Option<SyncConfig>> {
        let row = sqlx::query("SELECT * FROM sync_configs WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(config_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_configs(&self) -> anyhow::Result<Vec<SyncConfig>> {
        let rows = sqlx::query("SELECT * FROM sync_configs ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in &rows {
            configs.push(config_from_row(row)?);
        }
        Ok(configs)
    }

    async fn remove_config(&self, local_path: &Path) -> anyhow::Result<()> {
        let path = local_path.to_string_lossy().to_string();
        let mut tx = self.pool.begin().await?;

        // Children go first so removal does not depend on the foreign_keys pragma
        sqlx::query(
            "DELETE FROM sync_items WHERE config_id IN \
             (SELECT id FROM sync_configs WHERE local_path = ?)",
        )
        .bind(&path)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM sync_log WHERE config_id IN \
             (SELECT id FROM sync_configs WHERE local_path = ?)",
        )
        .bind(&path)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM sync_configs WHERE local_path = ?")
            .bind(&path)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(CacheError::NotFound(format!("sync configuration for {path}")).into());
        }

        tx.commit().await?;
        tracing::debug!(local_path = %path, "Removed sync configuration");
        Ok(())
    }

    async fn update_change_token(
        &self,
        id: ConfigId,
        token: &ChangeCursor,
    ) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE sync_configs SET change_token = ?, last_sync_at = ? WHERE id = ?",
        )
        .bind(token.as_str())
        .bind(format_datetime(Utc::now()))
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CacheError::NotFound(format!("sync configuration {id}")).into());
        }

        tracing::trace!(config_id = %id, cursor = %token, "Updated change token");
        Ok(())
    }

    // --- Status ---

    async fn get_status(&self, id: ConfigId) -> anyhow::Result<SyncStatus> {
        let config = self.require_config(id).await?;
        let counts = self.count_states(id).await?;
        Ok(SyncStatus::from_counts(config, &counts))
    }

    async fn list_statuses(&self) -> anyhow::Result<Vec<SyncStatus>> {
        let configs = self.list_configs().await?;
        let mut statuses = Vec::with_capacity(configs.len());
        for config in configs {
            let counts = self.count_states(config.id()).await?;
            statuses.push(SyncStatus::from_counts(config, &counts));
        }
        Ok(statuses)
    }

    // --- SyncItem operations ---

    async fn save_item(&self, item: &SyncItem) -> anyhow::Result<SyncItem> {
        let local_path = item.local_path().as_str();
        let remote_id = item.remote_id().map(|r| r.as_str()).unwrap_or("");
        let local_md5 = item.local_md5().map(|h| h.as_str()).unwrap_or("");
        let remote_md5 = item.remote_md5().map(|h| h.as_str()).unwrap_or("");
        let local_mtime = item.local_mtime().map(format_datetime);
        let remote_mtime = item.remote_mtime().map(format_datetime);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO sync_items \
             (config_id, local_path, remote_id, local_md5, remote_md5, \
              local_mtime, remote_mtime, sync_state) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(config_id, local_path) DO UPDATE SET \
              remote_id = excluded.remote_id, \
              local_md5 = excluded.local_md5, \
              remote_md5 = excluded.remote_md5, \
              local_mtime = excluded.local_mtime, \
              remote_mtime = excluded.remote_mtime, \
              sync_state = excluded.sync_state \
             RETURNING id",
        )
        .bind(item.config_id().as_i64())
        .bind(local_path)
        .bind(remote_id)
        .bind(local_md5)
        .bind(remote_md5)
        .bind(&local_mtime)
        .bind(&remote_mtime)
        .bind(item.state().as_str())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to save sync item {local_path}"))?;

        tracing::trace!(item_id = id, path = %local_path, state = %item.state(), "Saved sync item");

        let mut stored = item.clone();
        stored.set_id(ItemId::new(id));
        Ok(stored)
    }

    async fn get_item(
        &self,
        config_id: ConfigId,
        local_path: &RelativePath,
    ) -> anyhow::Result<Option<SyncItem>> {
        let row = sqlx::query("SELECT * FROM sync_items WHERE config_id = ? AND local_path = ?")
            .bind(config_id.as_i64())
            .bind(local_path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(sync_item_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_item_by_remote_id(
        &self,
        config_id: ConfigId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<SyncItem>> {
        let row = sqlx::query(
            "SELECT * FROM sync_items WHERE config_id = ? AND remote_id = ? LIMIT 1",
        )
        .bind(config_id.as_i64())
        .bind(remote_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(sync_item_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_items_by_state(
        &self,
        config_id: ConfigId,
        state: SyncState,
    ) -> anyhow::Result<Vec<SyncItem>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_items WHERE config_id = ? AND sync_state = ? ORDER BY local_path",
        )
        .bind(config_id.as_i64())
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(sync_item_from_row(row)?);
        }
        Ok(items)
    }

    async fn remove_item(
        &self,
        config_id: ConfigId,
        local_path: &RelativePath,
    ) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_items WHERE config_id = ? AND local_path = ?")
            .bind(config_id.as_i64())
            .bind(local_path.as_str())
            .execute(&self.pool)
            .await?;

        tracing::trace!(config_id = %config_id, path = %local_path, "Removed sync item");
        Ok(())
    }

    // --- Sync log ---

    async fn add_log_entry(&self, entry: &NewSyncLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO sync_log (config_id, action, path, timestamp, details) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.config_id().as_i64())
        .bind(entry.action().as_str())
        .bind(entry.path())
        .bind(format_datetime(Utc::now()))
        .bind(entry.details_json())
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            config_id = %entry.config_id(),
            action = %entry.action(),
            path = %entry.path(),
            "Appended sync log entry"
        );
        Ok(())
    }

    async fn get_recent_logs(
        &self,
        config_id: ConfigId,
        limit: u32,
    ) -> anyhow::Result<Vec<SyncLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_log WHERE config_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(config_id.as_i64())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(log_entry_from_row(row)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_formats() {
        let dt = parse_datetime("2026-02-03T10:20:30.000123Z").unwrap();
        assert_eq!(dt.timestamp(), 1_770_114_030);
        assert!(parse_datetime("2026-02-03 10:20:30").is_ok());
        assert!(parse_datetime("not a date").is_err());
    }

    #[test]
    fn test_format_datetime_is_fixed_width() {
        let a = format_datetime(DateTime::from_timestamp(1, 0).unwrap());
        let b = format_datetime(DateTime::from_timestamp(1, 5_000).unwrap());
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_empty_columns_map_to_none() {
        assert!(parse_remote_id(Some(String::new())).unwrap().is_none());
        assert!(parse_hash(None).unwrap().is_none());
        assert!(parse_hash(Some("zz".into())).is_err());
        assert!(parse_optional_datetime(Some(String::new())).unwrap().is_none());
    }
}
