//! State store port (driven/secondary port)
//!
//! This module defines the interface for persisting engine state across
//! restarts: the configuration, the session, per-path baselines, open
//! conflicts, operation history and the selective-sync folder list.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, in-memory, ...) and don't need domain-level classification.
//! - Every write is an upsert keyed by path or id, so replaying a write after
//!   a crash is harmless.
//! - History is append-only; reads return the newest entries first in
//!   insertion order, never by timestamp, so entries sharing a timestamp keep
//!   their order.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::SyncConfig;
use crate::domain::{AuthSession, BaselineEntry, SyncConflict, SyncHistoryEntry};

/// Durable engine state
#[async_trait::async_trait]
pub trait IStateStore: Send + Sync {
    // --- configuration ---

    async fn load_config(&self) -> anyhow::Result<Option<SyncConfig>>;
    async fn save_config(&self, config: &SyncConfig) -> anyhow::Result<()>;

    // --- session ---

    async fn load_session(&self) -> anyhow::Result<Option<AuthSession>>;
    async fn save_session(&self, session: &AuthSession) -> anyhow::Result<()>;
    async fn clear_session(&self) -> anyhow::Result<()>;

    // --- baselines ---

    async fn load_baselines(&self) -> anyhow::Result<Vec<BaselineEntry>>;
    async fn save_baseline(&self, entry: &BaselineEntry) -> anyhow::Result<()>;
    /// Removes the baseline of `path`; a missing entry is not an error.
    async fn remove_baseline(&self, path: &str) -> anyhow::Result<()>;

    // --- conflicts ---

    /// Inserts or replaces the conflict with the same id.
    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()>;
    async fn get_conflict(&self, id: &str) -> anyhow::Result<Option<SyncConflict>>;
    async fn get_conflict_by_path(&self, path: &str) -> anyhow::Result<Option<SyncConflict>>;
    /// All open conflicts, oldest first.
    async fn list_conflicts(&self) -> anyhow::Result<Vec<SyncConflict>>;
    /// Returns `false` when no conflict had that id.
    async fn remove_conflict(&self, id: &str) -> anyhow::Result<bool>;

    // --- history ---

    async fn append_history(&self, entry: &SyncHistoryEntry) -> anyhow::Result<()>;
    /// Up to `limit` entries, most recently appended first.
    async fn recent_history(&self, limit: u32) -> anyhow::Result<Vec<SyncHistoryEntry>>;
    /// Deletes entries older than `before`; returns how many were removed.
    async fn prune_history(&self, before: DateTime<Utc>) -> anyhow::Result<u64>;

    // --- selective sync ---

    async fn load_sync_folders(&self) -> anyhow::Result<Vec<String>>;
    /// Replaces the whole selection.
    async fn save_sync_folders(&self, folder_ids: &[String]) -> anyhow::Result<()>;
}

/// Opens a state store at a database path
#[async_trait::async_trait]
pub trait IStateStoreFactory: Send + Sync {
    async fn open(&self, database_path: &Path) -> anyhow::Result<Arc<dyn IStateStore>>;
}
