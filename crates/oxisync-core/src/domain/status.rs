//! Engine state, progress and pass results

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the transfer queue stopped dequeuing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    /// The network is metered and `pause_on_metered` is set
    Metered,
    /// `wifi_only` is set and the host is on another kind of network
    NotOnWifi,
    /// No network at all
    Offline,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Metered => "metered network",
            Self::NotOnWifi => "not on wifi",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// State of the sync engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum EngineState {
    #[default]
    Idle,
    Scanning,
    Syncing,
    Paused(SuspendReason),
    Error(String),
}

impl EngineState {
    /// Returns the state name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Scanning => "Scanning",
            Self::Syncing => "Syncing",
            Self::Paused(_) => "Paused",
            Self::Error(_) => "Error",
        }
    }

    /// Whether a pass is running (scanning, draining or suspended mid-drain)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scanning | Self::Syncing | Self::Paused(_))
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused(reason) => write!(f, "Paused ({reason})"),
            Self::Error(msg) => write!(f, "Error: {msg}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Snapshot of the engine's progress reported to the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusInfo {
    pub is_syncing: bool,
    pub state: EngineState,
    pub current_operation: Option<String>,
    /// 0 to 100
    pub progress_percent: f32,
    pub items_synced: u32,
    pub items_total: u32,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub next_sync_time: Option<DateTime<Utc>>,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub items_uploaded: u32,
    pub items_downloaded: u32,
    pub items_deleted: u32,
    /// Conflicts detected during this pass
    pub conflicts: u32,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl SyncResult {
    /// Result returned when a request joins a pass that is already running
    pub fn coalesced() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// Aggregate statistics over the tracked tree and the current session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_files: u64,
    pub total_folders: u64,
    /// Bytes across all tracked files
    pub total_size: u64,
    pub pending_uploads: u32,
    pub pending_downloads: u32,
    pub conflicts: u32,
    pub errors: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub next_sync: Option<DateTime<Utc>>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

impl SyncStats {
    pub fn record_transfer(&mut self, uploaded: u64, downloaded: u64) {
        self.bytes_uploaded += uploaded;
        self.bytes_downloaded += downloaded;
    }

    pub fn has_pending(&self) -> bool {
        self.pending_uploads > 0 || self.pending_downloads > 0
    }

    pub fn is_healthy(&self) -> bool {
        self.errors == 0 && self.conflicts == 0
    }
}
