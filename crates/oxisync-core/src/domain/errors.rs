//! Domain error types
//!
//! This module defines the error types shared across the engine crates:
//! - [`DomainError`] for validation failures, invalid state transitions and path errors
//! - [`RemoteError`] for failures reported by the remote storage collaborator
//! - [`AuthError`] for login, refresh and session failures

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Invalid glob pattern in an ignore list or conflict rule
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

/// Errors reported by an [`IRemoteStorage`](crate::ports::IRemoteStorage) adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection could not be established or was dropped
    #[error("Network error: {0}")]
    Network(String),

    /// The request exceeded the client timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The server rejected the credentials (HTTP 401)
    #[error("Authentication rejected by server")]
    Unauthorized,

    /// The addressed resource does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// An `If-Match` precondition failed (HTTP 412)
    #[error("Precondition failed for {0}")]
    PreconditionFailed(String),

    /// The account is out of space (HTTP 507)
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// The server forbids the operation (HTTP 403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The server is throttling requests (HTTP 429)
    #[error("Too many requests")]
    TooManyRequests,

    /// Any other unexpected status code
    #[error("Server error: HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// The response body could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server does not support the requested capability
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The adapter has no session configured
    #[error("Remote storage is not configured")]
    NotConfigured,
}

impl RemoteError {
    /// Whether a later attempt of the same request may succeed.
    ///
    /// Network drops, timeouts, throttling and 5xx responses are transient.
    /// Everything else needs a different input to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::TooManyRequests => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Authentication errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid server URL: {0}")]
    InvalidServerUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
