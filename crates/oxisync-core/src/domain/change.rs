//! Change and action vocabulary
//!
//! The scanner emits [`ScanCandidate`]s: one per path that changed on at least
//! one side since the baseline. The conflict resolver turns each candidate into
//! zero or more [`SyncAction`]s which the engine executes in order.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::snapshot::{BaselineEntry, LocalEntry, RemoteEntry};
use super::sync_item::{SyncDirection, SyncItem};

/// How one side of a path differs from its baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Unchanged,
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Whether the side still holds content after the change
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Created | Self::Modified)
    }
}

/// A path whose local and/or remote state moved away from the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub item: SyncItem,
    pub local_change: ChangeKind,
    pub remote_change: ChangeKind,
    /// Previous path when a rename was recognized on the changed side
    pub moved_from: Option<String>,
    pub local: Option<LocalEntry>,
    pub remote: Option<RemoteEntry>,
    pub baseline: Option<BaselineEntry>,
}

impl ScanCandidate {
    pub fn path(&self) -> &str {
        &self.item.path
    }

    /// Deletions on either side that leave no content behind anywhere
    pub fn is_deletion(&self) -> bool {
        (self.local_change == ChangeKind::Deleted && !self.remote_change.is_present())
            || (self.remote_change == ChangeKind::Deleted && !self.local_change.is_present())
    }
}

/// What the engine does for one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ActionKind {
    Upload,
    Download,
    DeleteRemote,
    DeleteLocal,
    CreateRemoteDir,
    CreateLocalDir,
    /// Server-side move of `from` to the action's path
    MoveRemote { from: String },
    /// Local rename of `from` to the action's path
    MoveLocal { from: String },
    /// Local rename of the action's path to `to`, used for conflict copies
    RenameLocal { to: String },
    /// Both sides already agree; record the baseline
    RecordBaseline,
    /// Both sides are gone; drop the baseline
    ForgetBaseline,
}

impl ActionKind {
    pub fn direction(&self) -> SyncDirection {
        match self {
            Self::Upload | Self::DeleteRemote | Self::CreateRemoteDir | Self::MoveRemote { .. } => {
                SyncDirection::Upload
            }
            Self::Download | Self::DeleteLocal | Self::CreateLocalDir | Self::MoveLocal { .. } => {
                SyncDirection::Download
            }
            Self::RenameLocal { .. } | Self::RecordBaseline | Self::ForgetBaseline => {
                SyncDirection::None
            }
        }
    }

    /// Whether the action moves file content across the network
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Upload | Self::Download)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteRemote | Self::DeleteLocal)
    }

    /// Whether the action changes anything on disk or on the server
    pub fn touches_storage(&self) -> bool {
        !matches!(self, Self::RecordBaseline | Self::ForgetBaseline)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Download => f.write_str("download"),
            Self::DeleteRemote => f.write_str("delete remote"),
            Self::DeleteLocal => f.write_str("delete local"),
            Self::CreateRemoteDir => f.write_str("create remote directory"),
            Self::CreateLocalDir => f.write_str("create local directory"),
            Self::MoveRemote { from } => write!(f, "move remote from {from}"),
            Self::MoveLocal { from } => write!(f, "move local from {from}"),
            Self::RenameLocal { to } => write!(f, "rename local to {to}"),
            Self::RecordBaseline => f.write_str("record baseline"),
            Self::ForgetBaseline => f.write_str("forget baseline"),
        }
    }
}

/// One unit of work planned for a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAction {
    pub kind: ActionKind,
    /// Item addressed by the action; content attributes describe the source side
    pub item: SyncItem,
}

impl SyncAction {
    pub fn new(kind: ActionKind, mut item: SyncItem) -> Self {
        item.direction = kind.direction();
        Self { kind, item }
    }

    pub fn path(&self) -> &str {
        &self.item.path
    }
}
