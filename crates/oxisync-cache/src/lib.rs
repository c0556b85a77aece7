//! OxiSync Cache - SQLite persistence for engine state
//!
//! Everything the engine must find again after a restart lives in one SQLite
//! file: the configuration document, the authenticated session, per-path
//! baselines, open conflicts, the history log and the selective-sync list.
//!
//! [`SqliteStateStore`] is the `IStateStore` adapter; [`SqliteStoreFactory`]
//! is what the engine service receives so it can open the database named by
//! the configuration it is initialized with.
//!
//! ```no_run
//! use std::path::Path;
//! use oxisync_cache::{DatabasePool, SqliteStateStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let db = DatabasePool::new(Path::new("/var/lib/oxisync/state.db")).await?;
//! let store = SqliteStateStore::new(db.pool().clone());
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod store;

pub use pool::DatabasePool;
pub use store::{SqliteStateStore, SqliteStoreFactory};

/// Failure inside the state database layer
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The database file or its directory could not be opened
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("schema setup failed: {0}")]
    Schema(String),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A column held a value the domain types reject
    #[error("unreadable column value: {0}")]
    Decode(String),
}
