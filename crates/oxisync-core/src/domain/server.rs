//! Server and remote folder records

use serde::{Deserialize, Serialize};

/// Default quota assumed when the server does not report one (10 GiB)
pub const DEFAULT_QUOTA_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Capabilities and quota reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub url: String,
    pub version: String,
    pub name: String,
    pub webdav_url: String,
    /// Bytes
    pub quota_total: u64,
    /// Bytes
    pub quota_used: u64,
    pub supports_delta_sync: bool,
    pub supports_chunked_upload: bool,
}

impl ServerInfo {
    /// Info used when the server-info endpoint is unavailable.
    pub fn fallback(server_url: &str) -> Self {
        let url = server_url.trim_end_matches('/').to_string();
        Self {
            webdav_url: format!("{url}/dav"),
            url,
            version: "unknown".to_string(),
            name: "OxiCloud".to_string(),
            quota_total: DEFAULT_QUOTA_BYTES,
            quota_used: 0,
            supports_delta_sync: false,
            supports_chunked_upload: true,
        }
    }

    pub fn quota_available(&self) -> u64 {
        self.quota_total.saturating_sub(self.quota_used)
    }

    /// Used quota in percent, 0 when the total is unknown
    pub fn quota_percent(&self) -> f32 {
        if self.quota_total == 0 {
            return 0.0;
        }
        (self.quota_used as f64 / self.quota_total as f64 * 100.0) as f32
    }
}

/// A top-level remote folder offered for selective sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    /// Stable identifier; the folder's remote path
    pub id: String,
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub item_count: u32,
    pub is_selected: bool,
}
