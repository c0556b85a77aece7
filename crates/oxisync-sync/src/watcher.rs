//! Local change watching
//!
//! [`FileWatcher`] wraps the `notify` crate and forwards the events under
//! the sync folder as [`WatchEvent`] values. [`DebouncedChangeQueue`] holds the
//! relative paths those events touched until they have been quiet for the
//! debounce window, so an editor saving a file ten times in a row produces a
//! single pass.
//!
//! ```text
//!  notify thread ──→ mpsc ──→ DebouncedChangeQueue ──→ ChangeScheduler ──→ SyncEngine
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use oxisync_core::domain::path as relpath;
use oxisync_core::ignore::is_staging_file;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Capacity of the channel between the notify thread and the scheduler
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// WatchEvent
// ============================================================================

/// A filesystem change under the sync folder (absolute paths)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl WatchEvent {
    /// Every path the event touched; both ends for a rename
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Removed(p) => vec![p],
            Self::Renamed { from, to } => vec![from, to],
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Recursive watch on the sync folder; dropping it stops the watch.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Starts watching `root` recursively.
    ///
    /// # Errors
    /// Fails when the OS watcher cannot be created or the folder cannot be
    /// watched (missing, permissions, inotify limit).
    pub fn start(root: &Path) -> Result<(Self, mpsc::Receiver<WatchEvent>)> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = translate(&event) {
                        if tx.blocking_send(change).is_err() {
                            debug!("Watch event dropped, receiver closed");
                        }
                    }
                }
                Err(err) => error!(error = %err, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        info!(root = %root.display(), "Watching sync folder");

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_staging_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_staging_file)
}

/// Maps a raw notify event; access events and our own staging files are dropped.
fn translate(event: &notify::Event) -> Option<WatchEvent> {
    let first = event.paths.first()?;

    let mapped = match &event.kind {
        EventKind::Create(_) => WatchEvent::Created(first.clone()),
        EventKind::Remove(_) => WatchEvent::Removed(first.clone()),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let to = event.paths[1].clone();
            if is_staging_path(first) {
                // A committed download; the destination is already accounted for
                return None;
            }
            WatchEvent::Renamed {
                from: first.clone(),
                to,
            }
        }
        EventKind::Modify(_) => WatchEvent::Modified(first.clone()),
        _ => return None,
    };

    if mapped.paths().iter().all(|p| is_staging_path(p)) {
        return None;
    }
    Some(mapped)
}

/// Relative paths touched by `event` that lie under `root`.
pub fn relative_paths(root: &Path, event: &WatchEvent) -> Vec<String> {
    event
        .paths()
        .into_iter()
        .filter(|p| !is_staging_path(p))
        .filter_map(|p| {
            let rel = relpath::to_relative(root, p);
            if rel.is_none() {
                warn!(path = %p.display(), "Ignoring event outside the sync folder");
            }
            rel
        })
        .filter(|rel| !rel.is_empty())
        .collect()
}

// ============================================================================
// DebouncedChangeQueue
// ============================================================================

/// Changed paths waiting for their debounce window to pass.
///
/// Every new event for a path restarts its window.
#[derive(Debug)]
pub struct DebouncedChangeQueue {
    pending: HashMap<String, Instant>,
    quiet: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(quiet: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            quiet,
        }
    }

    pub fn push(&mut self, path: String) {
        self.push_at(path, Instant::now());
    }

    pub fn push_at(&mut self, path: String, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Removes and returns the paths quiet since `now - quiet`, sorted.
    pub fn take_settled(&mut self, now: Instant) -> Vec<String> {
        let quiet = self.quiet;
        let mut settled = Vec::new();
        self.pending.retain(|path, last| {
            if now.duration_since(*last) >= quiet {
                settled.push(path.clone());
                false
            } else {
                true
            }
        });
        settled.sort();
        if !settled.is_empty() {
            debug!(count = settled.len(), "Local changes settled");
        }
        settled
    }

    /// When the earliest pending path settles
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().map(|t| *t + self.quiet)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Unit tests
// ============================================================================
