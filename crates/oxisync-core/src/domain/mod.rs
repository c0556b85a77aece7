//! Domain entities
//!
//! This module contains the core domain types for OxiSync:
//! - Relative path helpers
//! - Sync items, statuses and directions
//! - Conflict records and resolutions
//! - History entries
//! - Server, folder and authentication records
//! - Snapshot records produced by the local and remote listings
//! - The change/action vocabulary exchanged between scanner, resolver and engine
//! - Domain-specific error types

pub mod auth;
pub mod change;
pub mod conflict;
pub mod errors;
pub mod history;
pub mod path;
pub mod server;
pub mod snapshot;
pub mod status;
pub mod sync_item;

// Re-export commonly used types
pub use auth::{AuthCredentials, AuthResult, AuthSession};
pub use change::{ActionKind, ChangeKind, ScanCandidate, SyncAction};
pub use conflict::{ConflictResolution, SyncConflict};
pub use errors::{AuthError, DomainError, RemoteError};
pub use history::{HistoryOperation, HistoryStatus, SyncHistoryEntry};
pub use server::{RemoteFolder, ServerInfo, DEFAULT_QUOTA_BYTES};
pub use snapshot::{BaselineEntry, LocalEntry, RemoteEntry};
pub use status::{EngineState, SuspendReason, SyncResult, SyncStats, SyncStatusInfo};
pub use sync_item::{ConflictInfo, ConflictType, SyncDirection, SyncItem, SyncStatus};
