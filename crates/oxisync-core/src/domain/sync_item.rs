//! SyncItem domain entity
//!
//! A [`SyncItem`] describes one file or directory the engine is tracking in the
//! current pass: its metadata, the side it flows towards and its status.
//!
//! ## Status flow
//!
//! ```text
//!   Idle ──► Pending ──► InProgress ──► Synced
//!               │             │
//!               │             └──────► Error(msg)
//!               └──► Conflict(info)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::path;
use super::snapshot::{LocalEntry, RemoteEntry};

// ============================================================================
// SyncDirection
// ============================================================================

/// Direction in which an item's content flows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Upload,
    Download,
    #[default]
    None,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for SyncDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            "none" => Ok(Self::None),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown sync direction: {other}"
            ))),
        }
    }
}

// ============================================================================
// ConflictType / ConflictInfo
// ============================================================================

/// Kind of divergence between the local and remote side of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides changed the content since the last sync
    BothModified,
    /// Deleted locally while modified remotely
    LocalDeletedRemoteModified,
    /// Deleted remotely while modified locally
    RemoteDeletedLocalModified,
    /// One side holds a directory, the other a file
    TypeMismatch,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BothModified => "both_modified",
            Self::LocalDeletedRemoteModified => "local_deleted_remote_modified",
            Self::RemoteDeletedLocalModified => "remote_deleted_local_modified",
            Self::TypeMismatch => "type_mismatch",
        }
    }

    /// Whether one side of the conflict no longer exists
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            Self::LocalDeletedRemoteModified | Self::RemoteDeletedLocalModified
        )
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both_modified" => Ok(Self::BothModified),
            "local_deleted_remote_modified" => Ok(Self::LocalDeletedRemoteModified),
            "remote_deleted_local_modified" => Ok(Self::RemoteDeletedLocalModified),
            "type_mismatch" => Ok(Self::TypeMismatch),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown conflict type: {other}"
            ))),
        }
    }
}

/// Details attached to a [`SyncStatus::Conflict`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub conflict_type: ConflictType,
    pub detected_at: DateTime<Utc>,
}

// ============================================================================
// SyncStatus
// ============================================================================

/// Status of a tracked item within the current pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum SyncStatus {
    #[default]
    Idle,
    Pending,
    InProgress,
    Synced,
    Conflict(ConflictInfo),
    Error(String),
}

impl SyncStatus {
    /// Returns the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Synced => "synced",
            Self::Conflict(_) => "conflict",
            Self::Error(_) => "error",
        }
    }

    /// Whether the item still has work queued or running
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(msg) => write!(f, "error: {msg}"),
            Self::Conflict(info) => write!(f, "conflict: {}", info.conflict_type),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// SyncItem
// ============================================================================

/// A file or directory tracked by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: String,
    /// Path relative to the sync root, `/`-separated
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    /// Hex SHA-256 of the content; `None` until computed
    pub content_hash: Option<String>,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub direction: SyncDirection,
    pub etag: Option<String>,
    pub mime_type: Option<String>,
}

impl SyncItem {
    /// Creates a bare item for `path` with a fresh id
    pub fn new(path: impl Into<String>, is_directory: bool) -> Self {
        let path = path.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: path::file_name(&path).to_string(),
            path,
            is_directory,
            size: 0,
            content_hash: None,
            local_modified: None,
            remote_modified: None,
            status: SyncStatus::Idle,
            direction: SyncDirection::None,
            etag: None,
            mime_type: None,
        }
    }

    /// Builds an item from whichever snapshot records exist for a path.
    ///
    /// Content attributes come from the side that is authoritative for
    /// `direction`: the local record for uploads, the remote record otherwise.
    pub fn from_snapshots(
        path: &str,
        local: Option<&LocalEntry>,
        remote: Option<&RemoteEntry>,
        direction: SyncDirection,
    ) -> Self {
        let is_directory = match (direction, local, remote) {
            (SyncDirection::Upload, Some(l), _) => l.is_directory,
            (_, _, Some(r)) => r.is_directory,
            (_, Some(l), None) => l.is_directory,
            (_, None, None) => false,
        };
        let mut item = Self::new(path, is_directory);
        item.direction = direction;
        item.local_modified = local.map(|l| l.modified);
        item.remote_modified = remote.map(|r| r.modified);
        item.etag = remote.and_then(|r| r.etag.clone());
        item.mime_type = remote.and_then(|r| r.mime_type.clone());

        let prefer_local = direction == SyncDirection::Upload || remote.is_none();
        match (prefer_local, local, remote) {
            (true, Some(l), _) => {
                item.size = l.size;
                item.content_hash = l.content_hash.clone();
            }
            (_, _, Some(r)) => {
                item.size = r.size;
                item.content_hash = r.content_hash.clone();
            }
            _ => {}
        }
        item
    }

    /// Returns a copy of this item re-addressed to `path`
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: path::file_name(&path).to_string(),
            path,
            ..self.clone()
        }
    }
}
