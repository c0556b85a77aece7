//! Resolution planning
//!
//! Turns a classified candidate into the ordered [`SyncAction`]s that make
//! both sides agree, or into a [`SyncConflict`] that has to wait for a
//! decision. The same planning is used for one-way propagation, automatic
//! policies and explicit resolutions chosen by the user.

use chrono::Duration;
use oxisync_core::config::ConflictsConfig;
use oxisync_core::domain::{
    ActionKind, ConflictResolution, ConflictType, LocalEntry, RemoteEntry, ScanCandidate,
    SyncAction, SyncConflict, SyncDirection, SyncItem,
};
use tracing::{debug, info};

use crate::detector::{Classification, ConflictDetector};
use crate::error::ConflictError;
use crate::namer::ConflictNamer;
use crate::policy::{PolicyEngine, Strategy};

/// Upper bound for the simultaneous-edit tolerance (one day)
const MAX_EPSILON_SECS: i64 = 86_400;

/// What to do with a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Execute these actions in order
    Actions(Vec<SyncAction>),
    /// Record the conflict and leave the path alone
    Deferred(SyncConflict),
}

/// Plans the actions that settle a path
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    policy: PolicyEngine,
    epsilon: Duration,
}

impl ConflictResolver {
    pub fn new(policy: PolicyEngine, simultaneous_epsilon_secs: u64) -> Self {
        let secs = i64::try_from(simultaneous_epsilon_secs)
            .unwrap_or(i64::MAX)
            .min(MAX_EPSILON_SECS);
        Self {
            policy,
            epsilon: Duration::seconds(secs),
        }
    }

    pub fn from_config(config: &ConflictsConfig) -> Self {
        Self::new(
            PolicyEngine::from_config(config),
            config.simultaneous_epsilon_secs,
        )
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Decides what to do with one scan candidate.
    ///
    /// `taken` reports whether a relative path is already in use on either
    /// side; it is consulted when a conflict copy has to be named.
    pub fn decide<F>(&self, candidate: &ScanCandidate, taken: F) -> Decision
    where
        F: FnMut(&str) -> bool,
    {
        let path = candidate.path();
        let local = candidate.local.as_ref();
        let remote = candidate.remote.as_ref();
        let moved_from = candidate.moved_from.as_deref();

        match ConflictDetector::classify(candidate) {
            Classification::OneWay(SyncDirection::Upload) => {
                Decision::Actions(push_local(path, local, remote, moved_from))
            }
            Classification::OneWay(SyncDirection::Download) => {
                Decision::Actions(pull_remote(path, local, remote, moved_from))
            }
            Classification::OneWay(SyncDirection::None) | Classification::Converged => {
                Decision::Actions(converged(path, local, remote))
            }
            Classification::Divergent(conflict_type) => {
                self.settle(candidate, conflict_type, taken)
            }
        }
    }

    fn settle<F>(&self, candidate: &ScanCandidate, conflict_type: ConflictType, taken: F) -> Decision
    where
        F: FnMut(&str) -> bool,
    {
        let path = candidate.path();
        let local = candidate.local.as_ref();
        let remote = candidate.remote.as_ref();
        let strategy = self.policy.evaluate(path);
        debug!(path = %path, strategy = %strategy, conflict_type = %conflict_type, "Settling divergent path");

        let actions = match strategy {
            Strategy::Manual => None,
            Strategy::KeepLocal => Some(push_local(path, local, remote, None)),
            Strategy::KeepRemote => Some(pull_remote(path, local, remote, None)),
            Strategy::KeepBoth | Strategy::MostRecentWins if conflict_type.is_deletion() => {
                Some(keep_modified(path, local, remote, conflict_type))
            }
            Strategy::KeepBoth => Some(keep_both(path, local, remote, taken)),
            Strategy::MostRecentWins => match self.newer_side(local, remote) {
                Some(SyncDirection::Upload) => Some(push_local(path, local, remote, None)),
                Some(SyncDirection::Download) => Some(pull_remote(path, local, remote, None)),
                _ => {
                    info!(path = %path, "Modification times within tolerance, surfacing conflict");
                    None
                }
            },
        };

        match actions {
            Some(actions) => Decision::Actions(actions),
            None => Decision::Deferred(SyncConflict::from_candidate(candidate, conflict_type)),
        }
    }

    /// Side with the clearly newer modification time, `None` when the
    /// difference is within the simultaneous-edit tolerance.
    fn newer_side(
        &self,
        local: Option<&LocalEntry>,
        remote: Option<&RemoteEntry>,
    ) -> Option<SyncDirection> {
        let (local, remote) = (local?, remote?);
        let diff = local.modified - remote.modified;
        if diff.num_milliseconds().abs() <= self.epsilon.num_milliseconds() {
            None
        } else if diff > Duration::zero() {
            Some(SyncDirection::Upload)
        } else {
            Some(SyncDirection::Download)
        }
    }

    /// Actions for an explicit decision on an open conflict, against the
    /// current state of both sides.
    ///
    /// Keeping the local copy fails with [`ConflictError::VersionChanged`]
    /// when the remote moved on since the conflict was recorded.
    pub fn plan_resolution<F>(
        &self,
        conflict: &SyncConflict,
        choice: ConflictResolution,
        local: Option<&LocalEntry>,
        remote: Option<&RemoteEntry>,
        taken: F,
    ) -> Result<Vec<SyncAction>, ConflictError>
    where
        F: FnMut(&str) -> bool,
    {
        let path = conflict.item_path.as_str();

        if choice == ConflictResolution::KeepLocal {
            if let Some(expected) = &conflict.remote_etag {
                let actual = remote.and_then(|r| r.etag.clone());
                if actual.as_deref() != Some(expected.as_str()) {
                    return Err(ConflictError::VersionChanged {
                        expected: Some(expected.clone()),
                        actual,
                    });
                }
            }
        }

        let actions = match choice {
            ConflictResolution::KeepLocal => push_local(path, local, remote, None),
            ConflictResolution::KeepRemote => pull_remote(path, local, remote, None),
            ConflictResolution::KeepBoth => keep_both(path, local, remote, taken),
        };
        debug!(path = %path, choice = %choice, actions = actions.len(), "Planned conflict resolution");
        Ok(actions)
    }
}

// ============================================================================
// Planning helpers
// ============================================================================

fn local_item(path: &str, local: Option<&LocalEntry>, remote: Option<&RemoteEntry>) -> SyncItem {
    SyncItem::from_snapshots(path, local, remote, SyncDirection::Upload)
}

fn remote_item(path: &str, local: Option<&LocalEntry>, remote: Option<&RemoteEntry>) -> SyncItem {
    SyncItem::from_snapshots(path, local, remote, SyncDirection::Download)
}

/// Makes the remote side match the local side.
pub fn push_local(
    path: &str,
    local: Option<&LocalEntry>,
    remote: Option<&RemoteEntry>,
    moved_from: Option<&str>,
) -> Vec<SyncAction> {
    let action = |kind, item| SyncAction::new(kind, item);
    match (local, remote) {
        (None, None) => vec![action(ActionKind::ForgetBaseline, SyncItem::new(path, false))],
        (None, Some(_)) => vec![action(ActionKind::DeleteRemote, remote_item(path, None, remote))],
        (Some(l), Some(r)) if l.is_directory && r.is_directory => {
            vec![action(ActionKind::RecordBaseline, local_item(path, local, remote))]
        }
        (Some(l), Some(_)) if l.is_directory => vec![
            action(ActionKind::DeleteRemote, remote_item(path, None, remote)),
            action(ActionKind::CreateRemoteDir, local_item(path, local, None)),
        ],
        (Some(l), None) if l.is_directory => {
            vec![action(ActionKind::CreateRemoteDir, local_item(path, local, None))]
        }
        (Some(_), Some(r)) if r.is_directory => vec![
            action(ActionKind::DeleteRemote, remote_item(path, None, remote)),
            action(ActionKind::Upload, local_item(path, local, None)),
        ],
        (Some(_), None) => match moved_from {
            Some(from) => vec![action(
                ActionKind::MoveRemote {
                    from: from.to_string(),
                },
                local_item(path, local, None),
            )],
            None => vec![action(ActionKind::Upload, local_item(path, local, None))],
        },
        (Some(_), Some(_)) => vec![action(ActionKind::Upload, local_item(path, local, remote))],
    }
}

/// Makes the local side match the remote side.
pub fn pull_remote(
    path: &str,
    local: Option<&LocalEntry>,
    remote: Option<&RemoteEntry>,
    moved_from: Option<&str>,
) -> Vec<SyncAction> {
    let action = |kind, item| SyncAction::new(kind, item);
    match (local, remote) {
        (None, None) => vec![action(ActionKind::ForgetBaseline, SyncItem::new(path, false))],
        (Some(_), None) => vec![action(ActionKind::DeleteLocal, local_item(path, local, None))],
        (Some(l), Some(r)) if l.is_directory && r.is_directory => {
            vec![action(ActionKind::RecordBaseline, remote_item(path, local, remote))]
        }
        (Some(_), Some(r)) if r.is_directory => vec![
            action(ActionKind::DeleteLocal, local_item(path, local, None)),
            action(ActionKind::CreateLocalDir, remote_item(path, None, remote)),
        ],
        (None, Some(r)) if r.is_directory => {
            vec![action(ActionKind::CreateLocalDir, remote_item(path, None, remote))]
        }
        (Some(l), Some(_)) if l.is_directory => vec![
            action(ActionKind::DeleteLocal, local_item(path, local, None)),
            action(ActionKind::Download, remote_item(path, None, remote)),
        ],
        (None, Some(_)) => match moved_from {
            Some(from) => vec![action(
                ActionKind::MoveLocal {
                    from: from.to_string(),
                },
                remote_item(path, None, remote),
            )],
            None => vec![action(ActionKind::Download, remote_item(path, None, remote))],
        },
        (Some(_), Some(_)) => vec![action(ActionKind::Download, remote_item(path, local, remote))],
    }
}

/// Both sides already agree.
fn converged(path: &str, local: Option<&LocalEntry>, remote: Option<&RemoteEntry>) -> Vec<SyncAction> {
    if local.is_none() && remote.is_none() {
        vec![SyncAction::new(ActionKind::ForgetBaseline, SyncItem::new(path, false))]
    } else {
        vec![SyncAction::new(
            ActionKind::RecordBaseline,
            remote_item(path, local, remote),
        )]
    }
}

/// Deletion conflicts keep the side that still has content.
fn keep_modified(
    path: &str,
    local: Option<&LocalEntry>,
    remote: Option<&RemoteEntry>,
    conflict_type: ConflictType,
) -> Vec<SyncAction> {
    match conflict_type {
        ConflictType::LocalDeletedRemoteModified => pull_remote(path, local, remote, None),
        _ => push_local(path, local, remote, None),
    }
}

/// Moves the local copy aside under a conflict name, uploads it, and brings
/// the remote copy into the original path.
fn keep_both<F>(
    path: &str,
    local: Option<&LocalEntry>,
    remote: Option<&RemoteEntry>,
    taken: F,
) -> Vec<SyncAction>
where
    F: FnMut(&str) -> bool,
{
    let (Some(l), Some(_)) = (local, remote) else {
        return match local {
            Some(_) => push_local(path, local, remote, None),
            None => pull_remote(path, local, remote, None),
        };
    };

    let copy = ConflictNamer::copy_path(path, taken);
    let item = local_item(path, local, None);
    let mut actions = vec![SyncAction::new(
        ActionKind::RenameLocal { to: copy.clone() },
        item.clone(),
    )];
    // Directory copies are picked up by the next scan
    if !l.is_directory {
        actions.push(SyncAction::new(ActionKind::Upload, item.with_path(copy)));
    }
    actions.extend(pull_remote(path, None, remote, None));
    actions
}
