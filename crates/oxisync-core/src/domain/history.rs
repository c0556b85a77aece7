//! Sync history entries
//!
//! One [`SyncHistoryEntry`] is appended for every executed operation and for
//! every resolved conflict.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::sync_item::SyncDirection;

/// Kind of operation recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
    Upload,
    Download,
    Delete,
    Move,
    ConflictResolved,
}

impl HistoryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::ConflictResolved => "conflict_resolved",
        }
    }
}

impl fmt::Display for HistoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            "delete" => Ok(Self::Delete),
            "move" => Ok(Self::Move),
            "conflict_resolved" => Ok(Self::ConflictResolved),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown history operation: {other}"
            ))),
        }
    }
}

/// Outcome of a recorded operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failure,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl FromStr for HistoryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown history status: {other}"
            ))),
        }
    }
}

/// A single recorded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: HistoryOperation,
    pub item_path: String,
    pub direction: SyncDirection,
    pub status: HistoryStatus,
    pub error_message: Option<String>,
}

impl SyncHistoryEntry {
    pub fn success(
        operation: HistoryOperation,
        item_path: impl Into<String>,
        direction: SyncDirection,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            operation,
            item_path: item_path.into(),
            direction,
            status: HistoryStatus::Success,
            error_message: None,
        }
    }

    pub fn failure(
        operation: HistoryOperation,
        item_path: impl Into<String>,
        direction: SyncDirection,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: HistoryStatus::Failure,
            error_message: Some(error.into()),
            ..Self::success(operation, item_path, direction)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == HistoryStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_entry_carries_message() {
        let e = SyncHistoryEntry::failure(
            HistoryOperation::Upload,
            "a.txt",
            SyncDirection::Upload,
            "quota exceeded",
        );
        assert!(!e.is_success());
        assert_eq!(e.error_message.as_deref(), Some("quota exceeded"));
        assert_eq!(e.item_path, "a.txt");
    }

    #[test]
    fn operation_names_parse_back() {
        for op in [
            HistoryOperation::Upload,
            HistoryOperation::Download,
            HistoryOperation::Delete,
            HistoryOperation::Move,
            HistoryOperation::ConflictResolved,
        ] {
            assert_eq!(op.as_str().parse::<HistoryOperation>().unwrap(), op);
        }
        assert_eq!("failure".parse::<HistoryStatus>().unwrap(), HistoryStatus::Failure);
    }
}
