//! Snapshot records
//!
//! [`LocalEntry`] and [`RemoteEntry`] are produced by the local and remote
//! listings at the start of a pass. [`BaselineEntry`] is the last state both
//! sides agreed on for a path and is what changes are measured against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the local filesystem listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Hex SHA-256; always `None` for directories
    pub content_hash: Option<String>,
}

/// One entry of the remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Content hash when the server exposes one
    pub content_hash: Option<String>,
    pub etag: Option<String>,
    pub mime_type: Option<String>,
}

/// Last known-synced state of a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub content_hash: Option<String>,
    pub etag: Option<String>,
    pub remote_modified: Option<DateTime<Utc>>,
    /// Local mtime observed when the baseline was recorded
    pub local_modified: Option<DateTime<Utc>>,
    /// Block size the `block_hashes` were computed with, 0 when absent
    pub block_size: u64,
    /// Per-block hex SHA-256 used by delta transfers
    pub block_hashes: Vec<String>,
    pub synced_at: DateTime<Utc>,
}

impl BaselineEntry {
    /// Baseline for a directory present on both sides
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            size: 0,
            content_hash: None,
            etag: None,
            remote_modified: None,
            local_modified: None,
            block_size: 0,
            block_hashes: Vec::new(),
            synced_at: Utc::now(),
        }
    }

    /// Baseline for a file whose local and remote records now agree
    pub fn from_entries(local: &LocalEntry, remote: &RemoteEntry) -> Self {
        Self {
            path: local.path.clone(),
            is_directory: local.is_directory,
            size: local.size,
            content_hash: local.content_hash.clone().or_else(|| remote.content_hash.clone()),
            etag: remote.etag.clone(),
            remote_modified: Some(remote.modified),
            local_modified: Some(local.modified),
            block_size: 0,
            block_hashes: Vec::new(),
            synced_at: Utc::now(),
        }
    }

    /// Whether delta transfers can be planned against this baseline
    pub fn has_block_signature(&self) -> bool {
        !self.is_directory && self.block_size > 0 && !self.block_hashes.is_empty()
    }
}
