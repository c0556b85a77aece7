//! Network monitor port
//!
//! The host knows whether the device is on Wi-Fi or a metered link; the engine
//! only reads the latest report.

use serde::{Deserialize, Serialize};

/// Kind of network the host is currently attached to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Wifi,
    Ethernet,
    Cellular,
    /// The host did not report a kind
    #[default]
    Unknown,
    Offline,
}

/// Latest network report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub kind: NetworkKind,
    pub metered: bool,
}

impl NetworkStatus {
    pub fn new(kind: NetworkKind, metered: bool) -> Self {
        Self { kind, metered }
    }
}

/// Source of the current [`NetworkStatus`]
pub trait INetworkMonitor: Send + Sync {
    fn current(&self) -> NetworkStatus;
}
