//! Requests accepted by the engine service
//!
//! Every variant carries the one-shot channel its reply is sent on.

use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{
    AuthResult, ConflictResolution, RemoteFolder, ServerInfo, SyncConflict, SyncHistoryEntry,
    SyncItem, SyncResult, SyncStats, SyncStatusInfo,
};
use oxisync_core::ports::NetworkStatus;
use tokio::sync::oneshot;

use crate::error::ApiError;

/// Reply channel of a request returning `T`
pub type Reply<T> = oneshot::Sender<Result<T, ApiError>>;

/// One operation of the external interface
pub enum Request {
    Initialize {
        config: SyncConfig,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
    Login {
        server_url: String,
        username: String,
        password: String,
        reply: Reply<AuthResult>,
    },
    Logout {
        reply: Reply<()>,
    },
    IsLoggedIn {
        reply: Reply<bool>,
    },
    GetConfig {
        reply: Reply<SyncConfig>,
    },
    UpdateConfig {
        config: SyncConfig,
        reply: Reply<()>,
    },
    GetServerInfo {
        reply: Reply<ServerInfo>,
    },
    GetRemoteFolders {
        reply: Reply<Vec<RemoteFolder>>,
    },
    GetSyncFolders {
        reply: Reply<Vec<String>>,
    },
    SetSyncFolders {
        folder_ids: Vec<String>,
        reply: Reply<()>,
    },
    StartSync {
        reply: Reply<()>,
    },
    StopSync {
        reply: Reply<()>,
    },
    SyncNow {
        reply: Reply<SyncResult>,
    },
    GetSyncStatus {
        reply: Reply<SyncStatusInfo>,
    },
    GetPendingItems {
        reply: Reply<Vec<SyncItem>>,
    },
    GetConflicts {
        reply: Reply<Vec<SyncConflict>>,
    },
    ResolveConflict {
        conflict_id: String,
        resolution: ConflictResolution,
        reply: Reply<()>,
    },
    GetSyncHistory {
        limit: u32,
        reply: Reply<Vec<SyncHistoryEntry>>,
    },
    SetNetworkStatus {
        status: NetworkStatus,
        reply: Reply<()>,
    },
    GetStats {
        reply: Reply<SyncStats>,
    },
    /// Drops history entries older than `keep_days`; replies with the count removed
    ClearHistory {
        keep_days: u32,
        reply: Reply<u64>,
    },
}

impl Request {
    /// Operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Shutdown { .. } => "shutdown",
            Self::Login { .. } => "login",
            Self::Logout { .. } => "logout",
            Self::IsLoggedIn { .. } => "is_logged_in",
            Self::GetConfig { .. } => "get_config",
            Self::UpdateConfig { .. } => "update_config",
            Self::GetServerInfo { .. } => "get_server_info",
            Self::GetRemoteFolders { .. } => "get_remote_folders",
            Self::GetSyncFolders { .. } => "get_sync_folders",
            Self::SetSyncFolders { .. } => "set_sync_folders",
            Self::StartSync { .. } => "start_sync",
            Self::StopSync { .. } => "stop_sync",
            Self::SyncNow { .. } => "sync_now",
            Self::GetSyncStatus { .. } => "get_sync_status",
            Self::GetPendingItems { .. } => "get_pending_items",
            Self::GetConflicts { .. } => "get_conflicts",
            Self::ResolveConflict { .. } => "resolve_conflict",
            Self::GetSyncHistory { .. } => "get_sync_history",
            Self::SetNetworkStatus { .. } => "set_network_status",
            Self::GetStats { .. } => "get_stats",
            Self::ClearHistory { .. } => "clear_history",
        }
    }
}
