//! Mapping of HTTP outcomes onto [`RemoteError`]

use oxisync_core::domain::RemoteError;
use reqwest::StatusCode;

/// Classifies a non-success status. `what` names the request for messages.
pub(crate) fn error_for_status(status: StatusCode, what: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::FORBIDDEN => RemoteError::PermissionDenied(what.to_string()),
        StatusCode::NOT_FOUND => RemoteError::NotFound(what.to_string()),
        StatusCode::PRECONDITION_FAILED => RemoteError::PreconditionFailed(what.to_string()),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::TooManyRequests,
        StatusCode::INSUFFICIENT_STORAGE => RemoteError::QuotaExceeded,
        StatusCode::NOT_IMPLEMENTED => RemoteError::Unsupported(what.to_string()),
        other => RemoteError::Server {
            status: other.as_u16(),
            message: format!("{what} failed: {other}"),
        },
    }
}

/// Classifies a transport failure
pub(crate) fn error_for_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(err.to_string())
    } else if err.is_decode() {
        RemoteError::Protocol(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}
