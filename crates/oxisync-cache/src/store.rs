//! SQLite implementation of IStateStore
//!
//! ## Type Mapping
//!
//! | Domain Type            | SQL Type | Strategy                                   |
//! |------------------------|----------|--------------------------------------------|
//! | SyncConfig, AuthSession| TEXT     | serde_json document in the `kv` table      |
//! | DateTime<Utc>          | TEXT     | RFC 3339, nanoseconds, `Z` suffix           |
//! | u64 sizes              | INTEGER  | stored as `i64`, clamped on read            |
//! | block hashes           | TEXT     | serde_json array                           |
//! | ConflictType, enums    | TEXT     | snake_case name via `as_str()` / `FromStr` |
//!
//! History rows carry an autoincrement `seq` so reads keep insertion order even
//! when timestamps collide.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{
    AuthSession, BaselineEntry, ConflictType, HistoryOperation, HistoryStatus, SyncConflict,
    SyncDirection, SyncHistoryEntry,
};
use oxisync_core::ports::{IStateStore, IStateStoreFactory};

use crate::pool::DatabasePool;
use crate::CacheError;

const KEY_CONFIG: &str = "config";
const KEY_SESSION: &str = "session";

/// SQLite-backed engine state
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_document(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_document(&self, key: &str, value: &str) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(fmt_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Fixed-width UTC timestamps, so text comparison in SQL orders them correctly
fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::Decode(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn from_sql_size(size: i64) -> u64 {
    u64::try_from(size).unwrap_or(0)
}

fn parse_enum<T>(value: &str) -> Result<T, CacheError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(value).map_err(|e| CacheError::Decode(e.to_string()))
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn baseline_from_row(row: &SqliteRow) -> Result<BaselineEntry, CacheError> {
    let block_hashes: String = row.get("block_hashes");
    let synced_at: String = row.get("synced_at");

    Ok(BaselineEntry {
        path: row.get("path"),
        is_directory: row.get::<i64, _>("is_directory") != 0,
        size: from_sql_size(row.get("size")),
        content_hash: row.get("content_hash"),
        etag: row.get("etag"),
        remote_modified: parse_optional_datetime(row.get("remote_modified"))?,
        local_modified: parse_optional_datetime(row.get("local_modified"))?,
        block_size: from_sql_size(row.get("block_size")),
        block_hashes: serde_json::from_str(&block_hashes)?,
        synced_at: parse_datetime(&synced_at)?,
    })
}

fn conflict_from_row(row: &SqliteRow) -> Result<SyncConflict, CacheError> {
    let conflict_type: String = row.get("conflict_type");
    let detected_at: String = row.get("detected_at");

    Ok(SyncConflict {
        id: row.get("id"),
        item_path: row.get("item_path"),
        local_modified: parse_optional_datetime(row.get("local_modified"))?,
        remote_modified: parse_optional_datetime(row.get("remote_modified"))?,
        local_size: from_sql_size(row.get("local_size")),
        remote_size: from_sql_size(row.get("remote_size")),
        conflict_type: parse_enum::<ConflictType>(&conflict_type)?,
        detected_at: parse_datetime(&detected_at)?,
        remote_etag: row.get("remote_etag"),
    })
}

fn history_from_row(row: &SqliteRow) -> Result<SyncHistoryEntry, CacheError> {
    let timestamp: String = row.get("timestamp");
    let operation: String = row.get("operation");
    let direction: String = row.get("direction");
    let status: String = row.get("status");

    Ok(SyncHistoryEntry {
        id: row.get("id"),
        timestamp: parse_datetime(&timestamp)?,
        operation: parse_enum::<HistoryOperation>(&operation)?,
        item_path: row.get("item_path"),
        direction: parse_enum::<SyncDirection>(&direction)?,
        status: parse_enum::<HistoryStatus>(&status)?,
        error_message: row.get("error_message"),
    })
}

// ============================================================================
// IStateStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateStore for SqliteStateStore {
    // --- configuration ---

    async fn load_config(&self) -> anyhow::Result<Option<SyncConfig>> {
        match self.get_document(KEY_CONFIG).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(CacheError::from)?)),
            None => Ok(None),
        }
    }

    async fn save_config(&self, config: &SyncConfig) -> anyhow::Result<()> {
        let json = serde_json::to_string(config).map_err(CacheError::from)?;
        self.put_document(KEY_CONFIG, &json).await?;
        tracing::debug!("Saved configuration");
        Ok(())
    }

    // --- session ---

    async fn load_session(&self) -> anyhow::Result<Option<AuthSession>> {
        match self.get_document(KEY_SESSION).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(CacheError::from)?)),
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &AuthSession) -> anyhow::Result<()> {
        let json = serde_json::to_string(session).map_err(CacheError::from)?;
        self.put_document(KEY_SESSION, &json).await?;
        tracing::debug!(user = %session.username, "Saved session");
        Ok(())
    }

    async fn clear_session(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(KEY_SESSION)
            .execute(&self.pool)
            .await?;
        tracing::debug!("Cleared session");
        Ok(())
    }

    // --- baselines ---

    async fn load_baselines(&self) -> anyhow::Result<Vec<BaselineEntry>> {
        let rows = sqlx::query("SELECT * FROM baselines ORDER BY path ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(baseline_from_row(row)?);
        }
        Ok(entries)
    }

    async fn save_baseline(&self, entry: &BaselineEntry) -> anyhow::Result<()> {
        let block_hashes = serde_json::to_string(&entry.block_hashes).map_err(CacheError::from)?;

        sqlx::query(
            "INSERT OR REPLACE INTO baselines \
             (path, is_directory, size, content_hash, etag, remote_modified, \
              local_modified, block_size, block_hashes, synced_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.path)
        .bind(entry.is_directory as i64)
        .bind(to_sql_size(entry.size))
        .bind(&entry.content_hash)
        .bind(&entry.etag)
        .bind(entry.remote_modified.map(fmt_datetime))
        .bind(entry.local_modified.map(fmt_datetime))
        .bind(to_sql_size(entry.block_size))
        .bind(&block_hashes)
        .bind(fmt_datetime(entry.synced_at))
        .execute(&self.pool)
        .await?;

        tracing::trace!(path = %entry.path, "Saved baseline");
        Ok(())
    }

    async fn remove_baseline(&self, path: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM baselines WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        tracing::trace!(path = %path, "Removed baseline");
        Ok(())
    }

    // --- conflicts ---

    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (id, item_path, local_modified, remote_modified, local_size, remote_size, \
              conflict_type, detected_at, remote_etag) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conflict.id)
        .bind(&conflict.item_path)
        .bind(conflict.local_modified.map(fmt_datetime))
        .bind(conflict.remote_modified.map(fmt_datetime))
        .bind(to_sql_size(conflict.local_size))
        .bind(to_sql_size(conflict.remote_size))
        .bind(conflict.conflict_type.as_str())
        .bind(fmt_datetime(conflict.detected_at))
        .bind(&conflict.remote_etag)
        .execute(&self.pool)
        .await?;

        tracing::debug!(conflict_id = %conflict.id, path = %conflict.item_path, "Saved conflict");
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> anyhow::Result<Option<SyncConflict>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(conflict_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_conflict_by_path(&self, path: &str) -> anyhow::Result<Option<SyncConflict>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE item_path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(conflict_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_conflicts(&self) -> anyhow::Result<Vec<SyncConflict>> {
        let rows = sqlx::query("SELECT * FROM conflicts ORDER BY detected_at ASC, item_path ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut conflicts = Vec::with_capacity(rows.len());
        for row in &rows {
            conflicts.push(conflict_from_row(row)?);
        }
        Ok(conflicts)
    }

    async fn remove_conflict(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM conflicts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- history ---

    async fn append_history(&self, entry: &SyncHistoryEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO history \
             (id, timestamp, operation, item_path, direction, status, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(fmt_datetime(entry.timestamp))
        .bind(entry.operation.as_str())
        .bind(&entry.item_path)
        .bind(entry.direction.to_string())
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_history(&self, limit: u32) -> anyhow::Result<Vec<SyncHistoryEntry>> {
        let rows = sqlx::query("SELECT * FROM history ORDER BY seq DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(history_from_row(row)?);
        }
        Ok(entries)
    }

    async fn prune_history(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM history WHERE timestamp < ?")
            .bind(fmt_datetime(before))
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, "Pruned sync history");
        }
        Ok(removed)
    }

    // --- selective sync ---

    async fn load_sync_folders(&self) -> anyhow::Result<Vec<String>> {
        let folders: Vec<String> =
            sqlx::query_scalar("SELECT folder_id FROM sync_folders ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(folders)
    }

    async fn save_sync_folders(&self, folder_ids: &[String]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sync_folders")
            .execute(&mut *tx)
            .await?;
        for (position, id) in folder_ids.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO sync_folders (folder_id, position) VALUES (?, ?)")
                .bind(id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(count = folder_ids.len(), "Saved sync folder selection");
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Opens [`SqliteStateStore`]s; `":memory:"` selects an in-memory database
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteStoreFactory;

#[async_trait::async_trait]
impl IStateStoreFactory for SqliteStoreFactory {
    async fn open(&self, database_path: &Path) -> anyhow::Result<Arc<dyn IStateStore>> {
        let pool = DatabasePool::new(database_path).await?;
        Ok(Arc::new(SqliteStateStore::new(pool.pool().clone())))
    }
}
