//! OxiSync Sync - Background synchronization pipeline
//!
//! Provides:
//! - Three-way change scanning against the last synced baseline
//! - Delta transfer planning over fixed-size blocks
//! - A sequential transfer scheduler with retry, throttling and network gating
//! - The engine state machine, progress tracking and history
//! - Periodic and watcher-driven pass scheduling
//!
//! ## Modules
//!
//! - [`scanner`] - Pure baseline/local/remote comparison
//! - [`planner`] - Full vs delta transfer plans
//! - [`throttle`] - Per-direction token bucket
//! - [`network`] - Metered / Wi-Fi policy and the host-reported network status
//! - [`transfer`] - Drains the action queue
//! - [`state`] - Engine state, progress and history appends
//! - [`engine`] - One sync pass from scan to baseline update
//! - [`gateway`] - Config updates and the authenticated session
//! - [`scheduler`] - Interval timer and watcher wiring
//! - [`watcher`] - notify-based file watching with debouncing
//! - [`filesystem`] - Local filesystem adapter (staged writes, SHA-256)

pub mod engine;
pub mod filesystem;
pub mod gateway;
pub mod network;
pub mod planner;
pub mod scanner;
pub mod scheduler;
pub mod state;
pub mod throttle;
pub mod transfer;
pub mod watcher;

#[cfg(test)]
mod test_support;

use oxisync_core::config::ValidationError;
use oxisync_core::domain::{AuthError, DomainError, RemoteError};
use thiserror::Error;

pub use engine::SyncEngine;
pub use gateway::{AuthGateway, ConfigGateway};
pub use scheduler::PeriodicSync;
pub use state::SyncStateMachine;

/// Errors that abort or prevent a synchronization pass
#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable session; the host has to log in again
    #[error("not authenticated")]
    NotAuthenticated,

    /// One of the listings could not be obtained
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// The configuration was rejected; every problem is listed
    #[error("invalid configuration: {}", join_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    /// The state store failed
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// A conflict could not be recorded or resolved
    #[error("conflict error: {0}")]
    Conflict(#[from] oxisync_conflict::ConflictError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid state: {0}")]
    State(#[from] DomainError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors of a single transfer or filesystem action
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("local filesystem error: {0:#}")]
    Local(#[from] anyhow::Error),

    /// Content read or received does not match what was planned
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_retryable(),
            Self::ChecksumMismatch { .. } => true,
            Self::Local(_) | Self::Cancelled => false,
        }
    }

    /// Whether the server rejected our credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Unauthorized))
    }
}
