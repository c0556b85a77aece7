//! Network policy
//!
//! The host reports the current network through [`SharedNetworkStatus`];
//! [`suspend_reason`] decides whether the transfer queue may run on it.

use std::sync::RwLock;

use oxisync_core::config::SyncConfig;
use oxisync_core::domain::SuspendReason;
use oxisync_core::ports::{INetworkMonitor, NetworkKind, NetworkStatus};
use tracing::info;

/// Why transfers must wait on `status`, or `None` when they may run.
///
/// A network the host did not classify counts as allowed.
pub fn suspend_reason(config: &SyncConfig, status: NetworkStatus) -> Option<SuspendReason> {
    if status.kind == NetworkKind::Offline {
        return Some(SuspendReason::Offline);
    }
    if config.pause_on_metered && status.metered {
        return Some(SuspendReason::Metered);
    }
    if config.wifi_only && status.kind == NetworkKind::Cellular {
        return Some(SuspendReason::NotOnWifi);
    }
    None
}

/// Network status last reported by the host
#[derive(Debug, Default)]
pub struct SharedNetworkStatus {
    status: RwLock<NetworkStatus>,
}

impl SharedNetworkStatus {
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            status: RwLock::new(status),
        }
    }

    pub fn set(&self, status: NetworkStatus) {
        let mut current = self.status.write().unwrap_or_else(|e| e.into_inner());
        if *current != status {
            info!(kind = ?status.kind, metered = status.metered, "Network status changed");
            *current = status;
        }
    }
}

impl INetworkMonitor for SharedNetworkStatus {
    fn current(&self) -> NetworkStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }
}
