//! Conflict records
//!
//! A [`SyncConflict`] is persisted whenever a path diverged on both sides and no
//! policy could settle it automatically. It stays open until the host picks a
//! [`ConflictResolution`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::ScanCandidate;
use super::errors::DomainError;
use super::sync_item::ConflictType;

/// A surfaced divergence waiting for a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub item_path: String,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
    pub local_size: u64,
    pub remote_size: u64,
    pub conflict_type: ConflictType,
    pub detected_at: DateTime<Utc>,
    /// Remote ETag observed when the conflict was detected
    pub remote_etag: Option<String>,
}

impl SyncConflict {
    /// Creates a conflict record from the candidate that produced it
    pub fn from_candidate(candidate: &ScanCandidate, conflict_type: ConflictType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_path: candidate.path().to_string(),
            local_modified: candidate.local.as_ref().map(|l| l.modified),
            remote_modified: candidate.remote.as_ref().map(|r| r.modified),
            local_size: candidate.local.as_ref().map_or(0, |l| l.size),
            remote_size: candidate.remote.as_ref().map_or(0, |r| r.size),
            conflict_type,
            detected_at: Utc::now(),
            remote_etag: candidate.remote.as_ref().and_then(|r| r.etag.clone()),
        }
    }
}

/// Decision applied to an open conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Local copy wins and overwrites (or deletes) the remote
    KeepLocal,
    /// Remote copy wins and overwrites (or deletes) the local
    KeepRemote,
    /// Both copies survive under distinct paths
    KeepBoth,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::KeepBoth => "keep_both",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep_local" => Ok(Self::KeepLocal),
            "keep_remote" => Ok(Self::KeepRemote),
            "keep_both" => Ok(Self::KeepBoth),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown conflict resolution: {other}"
            ))),
        }
    }
}
