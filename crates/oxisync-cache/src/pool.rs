//! Opening the state database
//!
//! File databases run in WAL mode with a small connection pool. The literal
//! path `:memory:` selects a private in-memory database on one connection,
//! since every in-memory SQLite connection is a separate database.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

pub const IN_MEMORY: &str = ":memory:";

const FILE_CONNECTIONS: u32 = 4;
const LOCK_WAIT: Duration = Duration::from_secs(5);
const SCHEMA: &str = include_str!("migrations/20260301_initial.sql");

/// Migrated SQLite pool shared by the store
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens the database at `db_path`, creating the file and its parent
    /// directory when missing, and applies the schema.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if db_path.as_os_str() == IN_MEMORY {
            return Self::in_memory().await;
        }
        ensure_parent_dir(db_path)?;

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(LOCK_WAIT);
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Open(format!("{}: {e}", db_path.display())))?;

        let db = Self::with_schema(pool).await?;
        tracing::info!(path = %db_path.display(), "State database ready");
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::Open(format!("{IN_MEMORY}: {e}")))?;
        Self::with_schema(pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Every statement in the schema is `IF NOT EXISTS`, so reopening is safe.
    async fn with_schema(pool: SqlitePool) -> Result<Self, CacheError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CacheError::Schema(e.to_string()))?;
        tracing::debug!("State schema applied");
        Ok(Self { pool })
    }
}

fn ensure_parent_dir(db_path: &Path) -> Result<(), CacheError> {
    match db_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .map_err(|e| CacheError::Open(format!("{}: {e}", dir.display()))),
        _ => Ok(()),
    }
}
