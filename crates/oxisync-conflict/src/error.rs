//! Conflict engine errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConflictError {
    /// The server copy moved on after the conflict was recorded
    #[error("server copy changed since the conflict was recorded (ETag was {expected:?}, now {actual:?})")]
    VersionChanged {
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("could not apply resolution: {0}")]
    ResolutionFailed(String),

    #[error("no such conflict: {0}")]
    NotFound(String),

    /// Resolved already, or a resolution for it is running
    #[error("conflict {0} is already resolved")]
    AlreadyResolved(String),

    /// A rule carried a bad glob or strategy
    #[error("bad conflict rule pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("conflict store: {0:#}")]
    Storage(#[from] anyhow::Error),
}
