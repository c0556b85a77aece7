//! Error type returned across the service boundary

use oxisync_conflict::ConflictError;
use oxisync_core::domain::{AuthError, DomainError};
use oxisync_sync::SyncError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad category of an [`ApiError`], stable for hosts to branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiErrorKind {
    ConfigInvalid,
    AuthFailed,
    Network,
    NotFound,
    Conflict,
    Storage,
    NotInitialized,
    Internal,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "config-invalid",
            Self::AuthFailed => "auth-failed",
            Self::Network => "network",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
            Self::NotInitialized => "not-initialized",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed operation: a category plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_initialized() -> Self {
        Self::new(ApiErrorKind::NotInitialized, "engine is not initialized")
    }

    pub fn not_logged_in() -> Self {
        Self::new(ApiErrorKind::AuthFailed, "not logged in")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Internal, message)
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        let kind = match &e {
            SyncError::NotAuthenticated => ApiErrorKind::AuthFailed,
            SyncError::ScanFailed(_) => ApiErrorKind::Network,
            SyncError::InvalidConfig(_) => ApiErrorKind::ConfigInvalid,
            SyncError::Storage(_) => ApiErrorKind::Storage,
            SyncError::Conflict(inner) => return Self::from_conflict(inner, e.to_string()),
            SyncError::Auth(inner) => auth_kind(inner),
            SyncError::State(DomainError::InvalidState { .. }) => ApiErrorKind::Internal,
            SyncError::State(_) => ApiErrorKind::ConfigInvalid,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(auth_kind(&e), e.to_string())
    }
}

impl From<ConflictError> for ApiError {
    fn from(e: ConflictError) -> Self {
        let message = e.to_string();
        Self::from_conflict(&e, message)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(ApiErrorKind::Storage, format!("{e:#}"))
    }
}

impl ApiError {
    fn from_conflict(e: &ConflictError, message: String) -> Self {
        let kind = match e {
            ConflictError::NotFound(_) => ApiErrorKind::NotFound,
            ConflictError::InvalidPattern { .. } => ApiErrorKind::ConfigInvalid,
            ConflictError::Storage(_) => ApiErrorKind::Storage,
            ConflictError::VersionChanged { .. }
            | ConflictError::AlreadyResolved(_)
            | ConflictError::ResolutionFailed(_) => ApiErrorKind::Conflict,
        };
        Self::new(kind, message)
    }
}

fn auth_kind(e: &AuthError) -> ApiErrorKind {
    match e {
        AuthError::InvalidCredentials | AuthError::SessionExpired | AuthError::RefreshFailed(_) => {
            ApiErrorKind::AuthFailed
        }
        AuthError::InvalidServerUrl(_) => ApiErrorKind::ConfigInvalid,
        AuthError::Network(_) => ApiErrorKind::Network,
        AuthError::Storage(_) => ApiErrorKind::Storage,
    }
}
