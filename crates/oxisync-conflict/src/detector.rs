//! Conflict detection logic
//!
//! Classifies a scan candidate by looking at how each side moved away from
//! the baseline:
//!
//! | local \ remote | unchanged | created/modified | deleted |
//! |---|---|---|---|
//! | unchanged | (not emitted) | one-way download | one-way download |
//! | created/modified | one-way upload | converged or divergent | remote-deleted conflict |
//! | deleted | one-way upload | local-deleted conflict | converged |
//!
//! Both sides present and changed converge only when they hold the same kind
//! of entry and, for files, both content hashes are known and equal.

use oxisync_core::domain::{ChangeKind, ConflictType, ScanCandidate, SyncDirection};
use tracing::{debug, info};

/// Result of classifying a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Only one side changed; propagate it in `direction`
    OneWay(SyncDirection),
    /// Both sides reached the same state independently
    Converged,
    /// Both sides changed incompatibly
    Divergent(ConflictType),
}

/// Classifies scan candidates
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn classify(candidate: &ScanCandidate) -> Classification {
        use ChangeKind::*;

        let result = match (candidate.local_change, candidate.remote_change) {
            (Unchanged, Unchanged) => Classification::Converged,
            (_, Unchanged) => Classification::OneWay(SyncDirection::Upload),
            (Unchanged, _) => Classification::OneWay(SyncDirection::Download),
            (Deleted, Deleted) => Classification::Converged,
            (Deleted, _) => Classification::Divergent(ConflictType::LocalDeletedRemoteModified),
            (_, Deleted) => Classification::Divergent(ConflictType::RemoteDeletedLocalModified),
            (_, _) => Self::compare_present(candidate),
        };

        match result {
            Classification::Divergent(ty) => info!(
                path = %candidate.path(),
                conflict_type = %ty,
                "Conflict detected: both sides changed"
            ),
            other => debug!(path = %candidate.path(), classification = ?other, "Candidate classified"),
        }
        result
    }

    fn compare_present(candidate: &ScanCandidate) -> Classification {
        let (Some(local), Some(remote)) = (&candidate.local, &candidate.remote) else {
            // A present change without its record cannot be compared safely
            return Classification::Divergent(ConflictType::BothModified);
        };

        if local.is_directory != remote.is_directory {
            return Classification::Divergent(ConflictType::TypeMismatch);
        }
        if local.is_directory {
            return Classification::Converged;
        }

        match (&local.content_hash, &remote.content_hash) {
            (Some(l), Some(r)) if l == r && local.size == remote.size => Classification::Converged,
            _ => Classification::Divergent(ConflictType::BothModified),
        }
    }
}
