//! Three-way change scanner
//!
//! Compares the baseline (last state both sides agreed on) with fresh local
//! and remote listings and emits one [`ScanCandidate`] per path that moved on
//! at least one side. The scanner does no I/O: local content hashes must
//! already be filled in by the caller.
//!
//! ## Ordering
//!
//! Creates and modifications come first in ascending path order, so parents
//! are created before their children. Deletions follow in descending order,
//! so children are removed before their parents.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use oxisync_core::domain::{
    path, BaselineEntry, ChangeKind, LocalEntry, RemoteEntry, ScanCandidate, SyncDirection,
    SyncItem, SyncStatus,
};
use oxisync_core::ignore::IgnoreMatcher;
use tracing::debug;

/// Filters and switches applied to a scan
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions<'a> {
    pub ignore: &'a IgnoreMatcher,
    /// Selected remote folders; empty selects everything
    pub selected_folders: &'a [String],
    /// Pair deletes with creates of identical content into moves
    pub detect_renames: bool,
}

/// Compares the three views of the tree.
pub fn scan(
    baseline: &[BaselineEntry],
    local: &[LocalEntry],
    remote: &[RemoteEntry],
    options: &ScanOptions<'_>,
) -> Vec<ScanCandidate> {
    let baseline: BTreeMap<&str, &BaselineEntry> =
        baseline.iter().map(|b| (b.path.as_str(), b)).collect();
    let local: BTreeMap<&str, &LocalEntry> = local.iter().map(|l| (l.path.as_str(), l)).collect();
    let remote: BTreeMap<&str, &RemoteEntry> =
        remote.iter().map(|r| (r.path.as_str(), r)).collect();

    let paths: BTreeSet<&str> = baseline
        .keys()
        .chain(local.keys())
        .chain(remote.keys())
        .copied()
        .filter(|p| !p.is_empty())
        .collect();

    let mut candidates = Vec::new();
    let mut skipped = 0usize;
    for p in paths {
        if options.ignore.is_ignored(p) || !is_selected(p, options.selected_folders) {
            skipped += 1;
            continue;
        }

        let b = baseline.get(p).copied();
        let l = local.get(p).copied();
        let r = remote.get(p).copied();
        let local_change = local_change(b, l);
        let remote_change = remote_change(b, r);
        if !local_change.is_change() && !remote_change.is_change() {
            continue;
        }

        let direction = match (local_change.is_change(), remote_change.is_change()) {
            (true, false) => SyncDirection::Upload,
            (false, true) => SyncDirection::Download,
            _ => SyncDirection::None,
        };
        let mut item = SyncItem::from_snapshots(p, l, r, direction);
        item.status = SyncStatus::Pending;

        candidates.push(ScanCandidate {
            item,
            local_change,
            remote_change,
            moved_from: None,
            local: l.cloned(),
            remote: r.cloned(),
            baseline: b.cloned(),
        });
    }

    if options.detect_renames {
        candidates = pair_moves(candidates);
    }

    let (mut deletions, mut changes): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(ScanCandidate::is_deletion);
    changes.sort_by(|a, b| a.path().cmp(b.path()));
    deletions.sort_by(|a, b| b.path().cmp(a.path()));

    debug!(
        changes = changes.len(),
        deletions = deletions.len(),
        skipped,
        "Scan complete"
    );
    changes.extend(deletions);
    changes
}

/// Whether `p` lies inside a selected folder or is an ancestor of one.
fn is_selected(p: &str, folders: &[String]) -> bool {
    folders.is_empty()
        || folders
            .iter()
            .any(|f| path::is_within(p, f) || path::is_within(f, p))
}

fn local_change(baseline: Option<&BaselineEntry>, local: Option<&LocalEntry>) -> ChangeKind {
    match (baseline, local) {
        (None, None) => ChangeKind::Unchanged,
        (None, Some(_)) => ChangeKind::Created,
        (Some(_), None) => ChangeKind::Deleted,
        (Some(b), Some(l)) if b.is_directory != l.is_directory => ChangeKind::Modified,
        (Some(_), Some(l)) if l.is_directory => ChangeKind::Unchanged,
        (Some(b), Some(l)) => {
            let same = match (&b.content_hash, &l.content_hash) {
                (Some(bh), Some(lh)) => bh == lh,
                _ => b.size == l.size,
            };
            if same {
                ChangeKind::Unchanged
            } else {
                ChangeKind::Modified
            }
        }
    }
}

fn remote_change(baseline: Option<&BaselineEntry>, remote: Option<&RemoteEntry>) -> ChangeKind {
    match (baseline, remote) {
        (None, None) => ChangeKind::Unchanged,
        (None, Some(_)) => ChangeKind::Created,
        (Some(_), None) => ChangeKind::Deleted,
        (Some(b), Some(r)) if b.is_directory != r.is_directory => ChangeKind::Modified,
        (Some(_), Some(r)) if r.is_directory => ChangeKind::Unchanged,
        (Some(b), Some(r)) => {
            let same = match (&b.etag, &r.etag, &b.content_hash, &r.content_hash) {
                (Some(be), Some(re), _, _) => be == re,
                (_, _, Some(bh), Some(rh)) => bh == rh,
                _ => b.size == r.size && b.remote_modified == Some(r.modified),
            };
            if same {
                ChangeKind::Unchanged
            } else {
                ChangeKind::Modified
            }
        }
    }
}

// ============================================================================
// Rename detection
// ============================================================================

/// Which side a move happened on
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Local,
    Remote,
}

/// Key identifying a file's content on one side
type ContentKey = (Side, String, u64);

/// Folds a one-sided delete and a one-sided create of the same content into
/// a single candidate at the new path carrying `moved_from`.
fn pair_moves(candidates: Vec<ScanCandidate>) -> Vec<ScanCandidate> {
    let mut vanished: HashMap<ContentKey, Vec<usize>> = HashMap::new();
    for (idx, c) in candidates.iter().enumerate() {
        if let Some(key) = vanished_key(c) {
            vanished.entry(key).or_default().push(idx);
        }
    }
    if vanished.is_empty() {
        return candidates;
    }

    let mut moved_from: HashMap<usize, usize> = HashMap::new();
    for (idx, c) in candidates.iter().enumerate() {
        let Some(key) = appeared_key(c) else {
            continue;
        };
        if let Some(sources) = vanished.get_mut(&key) {
            if !sources.is_empty() {
                moved_from.insert(idx, sources.remove(0));
            }
        }
    }

    let consumed: BTreeSet<usize> = moved_from.values().copied().collect();
    let sources: HashMap<usize, String> = moved_from
        .iter()
        .map(|(&to, &from)| (to, candidates[from].path().to_string()))
        .collect();

    candidates
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !consumed.contains(idx))
        .map(|(idx, mut c)| {
            if let Some(from) = sources.get(&idx) {
                debug!(from = %from, to = %c.path(), "Rename detected");
                c.moved_from = Some(from.clone());
            }
            c
        })
        .collect()
}

fn vanished_key(c: &ScanCandidate) -> Option<ContentKey> {
    let b = c.baseline.as_ref().filter(|b| !b.is_directory)?;
    let hash = b.content_hash.clone()?;
    match (c.local_change, c.remote_change) {
        (ChangeKind::Deleted, ChangeKind::Unchanged) => Some((Side::Local, hash, b.size)),
        (ChangeKind::Unchanged, ChangeKind::Deleted) => Some((Side::Remote, hash, b.size)),
        _ => None,
    }
}

fn appeared_key(c: &ScanCandidate) -> Option<ContentKey> {
    match (c.local_change, c.remote_change) {
        (ChangeKind::Created, ChangeKind::Unchanged) if c.remote.is_none() => {
            let l = c.local.as_ref().filter(|l| !l.is_directory)?;
            Some((Side::Local, l.content_hash.clone()?, l.size))
        }
        (ChangeKind::Unchanged, ChangeKind::Created) if c.local.is_none() => {
            let r = c.remote.as_ref().filter(|r| !r.is_directory)?;
            Some((Side::Remote, r.content_hash.clone()?, r.size))
        }
        _ => None,
    }
}
