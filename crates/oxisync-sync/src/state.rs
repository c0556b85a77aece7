//! Sync state machine
//!
//! [`SyncStateMachine`] owns everything the host can observe about the
//! engine between requests:
//!
//! - the authoritative configuration snapshot, swapped whole on update
//! - the [`EngineState`] with validated transitions
//! - the [`SyncStatusInfo`] fields and the pass [`ProgressTracker`]
//! - history appends, serialized so entries keep their pass order
//! - a broadcast of every state change for hosts that want to follow it
//!
//! None of its locks is held across an await point except the history
//! append lock, which only guards the store write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{DomainError, EngineState, SyncHistoryEntry, SyncStatusInfo};
use oxisync_core::ports::IStateStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const STATE_CHANGE_BUFFER: usize = 64;

// ============================================================================
// Transitions
// ============================================================================

/// Whether the engine may move from `from` to `to`.
///
/// `Idle -> Syncing` covers conflict resolutions, which transfer without a scan.
fn can_transition(from: &EngineState, to: &EngineState) -> bool {
    use EngineState::*;
    matches!(
        (from, to),
        (Idle, Scanning)
            | (Idle, Syncing)
            | (Scanning, Syncing | Idle | Error(_))
            | (Syncing, Paused(_) | Idle | Error(_))
            | (Paused(_), Syncing | Paused(_) | Idle | Error(_))
            | (Error(_), Idle)
    )
}

// ============================================================================
// ProgressTracker
// ============================================================================

/// Progress of the current pass.
///
/// Percent is byte based when the pass plans to move bytes, item based
/// otherwise. Each item contributes at most its planned bytes and never
/// goes backwards, and the reported percent is a high-water mark clamped
/// to 100.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    planned: HashMap<usize, u64>,
    moved: HashMap<usize, u64>,
    items_total: u32,
    items_done: u32,
    bytes_total: u64,
    reported: f32,
}

impl ProgressTracker {
    /// Resets for a pass over `items` (queue index, planned bytes).
    pub fn start(&mut self, items: impl IntoIterator<Item = (usize, u64)>) {
        *self = Self::default();
        for (index, bytes) in items {
            self.planned.insert(index, bytes);
            self.bytes_total += bytes;
            self.items_total += 1;
        }
    }

    /// Records that item `index` has moved `bytes` so far.
    pub fn record(&mut self, index: usize, bytes: u64) {
        let cap = self.planned.get(&index).copied().unwrap_or(0);
        let moved = self.moved.entry(index).or_insert(0);
        *moved = (*moved).max(bytes.min(cap));
    }

    /// Marks item `index` finished, successfully or not.
    pub fn complete(&mut self, index: usize) {
        if let Some(&cap) = self.planned.get(&index) {
            let moved = self.moved.entry(index).or_insert(0);
            if *moved < cap {
                *moved = cap;
            }
            self.items_done = (self.items_done + 1).min(self.items_total);
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.moved.values().sum()
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn items_done(&self) -> u32 {
        self.items_done
    }

    pub fn items_total(&self) -> u32 {
        self.items_total
    }

    /// Current percent, never lower than any value returned before.
    pub fn percent(&mut self) -> f32 {
        let raw = if self.bytes_total > 0 {
            self.bytes_transferred() as f64 / self.bytes_total as f64 * 100.0
        } else if self.items_total > 0 {
            f64::from(self.items_done) / f64::from(self.items_total) * 100.0
        } else {
            0.0
        };
        let raw = (raw as f32).clamp(0.0, 100.0);
        if raw > self.reported {
            self.reported = raw;
        }
        self.reported
    }
}

// ============================================================================
// SyncStateMachine
// ============================================================================

/// Engine state, status and history owner
pub struct SyncStateMachine {
    config: RwLock<Arc<SyncConfig>>,
    status: RwLock<SyncStatusInfo>,
    progress: Mutex<ProgressTracker>,
    store: Arc<dyn IStateStore>,
    history: tokio::sync::Mutex<()>,
    changes: broadcast::Sender<EngineState>,
}

impl std::fmt::Debug for SyncStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateMachine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SyncStateMachine {
    pub fn new(config: SyncConfig, store: Arc<dyn IStateStore>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            status: RwLock::new(SyncStatusInfo::default()),
            progress: Mutex::new(ProgressTracker::default()),
            store,
            history: tokio::sync::Mutex::new(()),
            changes: broadcast::channel(STATE_CHANGE_BUFFER).0,
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// The configuration every new operation should read
    pub fn config(&self) -> Arc<SyncConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn replace_config(&self, config: SyncConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        debug!("Configuration snapshot replaced");
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn state(&self) -> EngineState {
        self.read_status().state.clone()
    }

    /// Moves to `to`, rejecting transitions the engine never makes.
    pub fn transition(&self, to: EngineState) -> Result<(), DomainError> {
        let mut status = self.write_status();
        if status.state == to {
            return Ok(());
        }
        if !can_transition(&status.state, &to) {
            return Err(DomainError::InvalidState {
                from: status.state.to_string(),
                to: to.to_string(),
            });
        }
        info!(from = %status.state, to = %to, "Engine state changed");
        status.is_syncing = to.is_active();
        status.state = to.clone();
        // No subscribers is fine
        let _ = self.changes.send(to);
        Ok(())
    }

    /// Every state entered from now on, in order
    pub fn subscribe(&self) -> broadcast::Receiver<EngineState> {
        self.changes.subscribe()
    }

    /// Enters `Scanning` for a new pass, clearing a previous error first.
    pub fn begin_pass(&self) -> Result<(), DomainError> {
        match self.state() {
            EngineState::Error(_) => self.transition(EngineState::Idle)?,
            EngineState::Idle => {}
            active => {
                return Err(DomainError::InvalidState {
                    from: active.to_string(),
                    to: EngineState::Scanning.to_string(),
                })
            }
        }
        self.transition(EngineState::Scanning)?;
        self.lock_progress().start(std::iter::empty());
        self.set_operation(Some("Scanning".to_string()));
        Ok(())
    }

    /// Ends the pass in `Idle` or `Error(message)`.
    pub fn finish_pass(&self, error: Option<String>) {
        let target = match error {
            Some(message) => EngineState::Error(message),
            None => EngineState::Idle,
        };
        if let Err(e) = self.transition(target.clone()) {
            warn!(error = %e, "Unexpected end-of-pass transition, forcing state");
            self.force_state(target);
        }
        self.set_operation(None);
    }

    /// Unconditionally returns to `Idle` (stop and shutdown).
    pub fn force_idle(&self) {
        self.force_state(EngineState::Idle);
        self.set_operation(None);
    }

    fn force_state(&self, state: EngineState) {
        let mut status = self.write_status();
        status.is_syncing = state.is_active();
        if status.state != state {
            let _ = self.changes.send(state.clone());
        }
        status.state = state;
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Snapshot for the host, progress fields included
    pub fn status(&self) -> SyncStatusInfo {
        let mut info = self.read_status().clone();
        let mut progress = self.lock_progress();
        info.progress_percent = progress.percent();
        info.items_synced = progress.items_done();
        info.items_total = progress.items_total();
        info.bytes_transferred = progress.bytes_transferred();
        info.bytes_total = progress.bytes_total();
        info
    }

    pub fn set_operation(&self, operation: Option<String>) {
        self.write_status().current_operation = operation;
    }

    pub fn set_next_sync(&self, at: Option<DateTime<Utc>>) {
        self.write_status().next_sync_time = at;
    }

    pub fn set_last_sync(&self, at: DateTime<Utc>) {
        self.write_status().last_sync_time = Some(at);
    }

    // ------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------

    pub fn start_progress(&self, items: impl IntoIterator<Item = (usize, u64)>) {
        self.lock_progress().start(items);
    }

    pub fn record_bytes(&self, index: usize, bytes: u64) {
        self.lock_progress().record(index, bytes);
    }

    pub fn complete_item(&self, index: usize) {
        self.lock_progress().complete(index);
    }

    pub fn progress_percent(&self) -> f32 {
        self.lock_progress().percent()
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub async fn append_history(&self, entry: &SyncHistoryEntry) -> anyhow::Result<()> {
        let _guard = self.history.lock().await;
        self.store.append_history(entry).await
    }

    pub async fn recent_history(&self, limit: u32) -> anyhow::Result<Vec<SyncHistoryEntry>> {
        self.store.recent_history(limit).await
    }

    /// Drops entries older than `keep_days`; returns how many went.
    pub async fn prune_history(&self, keep_days: u32) -> anyhow::Result<u64> {
        let _guard = self.history.lock().await;
        let before = Utc::now() - chrono::Duration::days(i64::from(keep_days));
        let removed = self.store.prune_history(before).await?;
        info!(keep_days, removed, "History pruned");
        Ok(removed)
    }

    fn read_status(&self) -> std::sync::RwLockReadGuard<'_, SyncStatusInfo> {
        self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_status(&self) -> std::sync::RwLockWriteGuard<'_, SyncStatusInfo> {
        self.status.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_progress(&self) -> std::sync::MutexGuard<'_, ProgressTracker> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
