//! Synchronization engine
//!
//! The [`SyncEngine`] runs one pass at a time:
//!
//! 1. **Scan**: list both trees, hash local files whose size or mtime moved
//!    (or that the watcher reported), compare against the baselines
//! 2. **Decide**: one-way changes become actions; divergent paths go through
//!    the conflict policy and are either settled or recorded
//! 3. **Transfer**: drain the action queue through the [`TransferScheduler`]
//! 4. **Bookkeeping**: each completed action updates its baseline and the
//!    history as it finishes, so an interrupted pass resumes where it stopped
//!
//! Paths with an open conflict are left alone until the conflict is resolved.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use oxisync_conflict::{ConflictError, ConflictRegistry, ConflictResolver, Decision};
use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{
    path, ActionKind, BaselineEntry, ChangeKind, ConflictResolution, EngineState,
    HistoryOperation, LocalEntry, RemoteError, RemoteFolder, ScanCandidate, ServerInfo,
    SuspendReason, SyncConflict, SyncDirection, SyncHistoryEntry, SyncItem, SyncResult,
    SyncStats, SyncStatus,
};
use oxisync_core::ignore::IgnoreMatcher;
use oxisync_core::ports::{ILocalFileSystem, INetworkMonitor, IRemoteStorage, IStateStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::gateway::AuthGateway;
use crate::scanner::{self, ScanOptions};
use crate::state::SyncStateMachine;
use crate::transfer::{
    planned_sizes, ActionOutcome, BaselineChange, QueuedAction, Throttles, TransferObserver,
    TransferScheduler,
};
use crate::{SyncError, TransferError};

/// Error recorded in a pass result when the pass was stopped
const CANCELLED: &str = "cancelled";
const HALT_POLL: Duration = Duration::from_millis(50);

/// Bidirectional synchronization engine
///
/// ## Dependencies
///
/// - `remote`: the user's remote tree
/// - `fs`: local file I/O and hashing
/// - `store`: baselines, conflicts, history and the selective-sync list
/// - `network`: host-reported network kind, checked before every action
/// - `auth`: the session every pass runs with
pub struct SyncEngine {
    remote: Arc<dyn IRemoteStorage>,
    fs: Arc<dyn ILocalFileSystem>,
    store: Arc<dyn IStateStore>,
    network: Arc<dyn INetworkMonitor>,
    state: Arc<SyncStateMachine>,
    auth: Arc<AuthGateway>,
    registry: ConflictRegistry,
    resolver: RwLock<ConflictResolver>,
    throttles: Throttles,
    /// Held for the whole of a pass or a conflict resolution
    pass_lock: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
    /// Paths reported by the watcher since the last scan
    changed_paths: Mutex<HashSet<String>>,
    /// Queue entries of the last pass that did not complete
    pending: Mutex<BTreeMap<usize, SyncItem>>,
    stats: Mutex<SyncStats>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn IRemoteStorage>,
        fs: Arc<dyn ILocalFileSystem>,
        store: Arc<dyn IStateStore>,
        network: Arc<dyn INetworkMonitor>,
        state: Arc<SyncStateMachine>,
        auth: Arc<AuthGateway>,
    ) -> Self {
        let config = state.config();
        Self {
            registry: ConflictRegistry::new(store.clone()),
            resolver: RwLock::new(ConflictResolver::from_config(&config.conflicts)),
            throttles: Throttles::from_config(&config),
            pass_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
            changed_paths: Mutex::new(HashSet::new()),
            pending: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(SyncStats::default()),
            remote,
            fs,
            store,
            network,
            state,
            auth,
        }
    }

    pub fn state(&self) -> &Arc<SyncStateMachine> {
        &self.state
    }

    pub fn throttles(&self) -> &Throttles {
        &self.throttles
    }

    pub fn registry(&self) -> &ConflictRegistry {
        &self.registry
    }

    /// Applies a new configuration to the throttles and the conflict policy.
    pub fn apply_config(&self, config: &SyncConfig) {
        self.throttles.retune(config);
        *self.resolver.write().unwrap_or_else(|e| e.into_inner()) =
            ConflictResolver::from_config(&config.conflicts);
    }

    /// Requests the running pass to stop at the next item or chunk.
    pub fn cancel_active(&self) {
        self.lock_cancel().cancel();
    }

    /// Cancels the running pass and waits until it has returned, cancelling
    /// again any pass that starts in the meantime.
    pub async fn halt(&self) {
        let mut poll = tokio::time::interval(HALT_POLL);
        loop {
            self.cancel_active();
            tokio::select! {
                _guard = self.pass_lock.lock() => return,
                _ = poll.tick() => {}
            }
        }
    }

    /// Marks paths whose content must be re-hashed at the next scan.
    pub fn note_local_changes(&self, paths: impl IntoIterator<Item = String>) {
        self.lock_changed().extend(paths);
    }

    /// Items queued by the last pass that have not completed
    pub fn pending_items(&self) -> Vec<SyncItem> {
        self.lock_pending().values().cloned().collect()
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Runs a pass now, or returns an empty success if one is already running.
    ///
    /// Fails only when the pass cannot start; failures during the pass are
    /// reported through the result and the engine state.
    pub async fn sync_now(&self) -> Result<SyncResult, SyncError> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            info!("Sync pass already running, coalescing request");
            return Ok(SyncResult::coalesced());
        };
        self.run_pass().await
    }

    /// Runs a pass after any running one has finished.
    pub async fn sync_queued(&self) -> Result<SyncResult, SyncError> {
        let _guard = self.pass_lock.lock().await;
        self.run_pass().await
    }

    #[instrument(skip(self))]
    async fn run_pass(&self) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        *self.lock_cancel() = cancel.clone();

        let session = self.auth.ensure_session().await?;
        if cancel.is_cancelled() {
            info!("Sync pass cancelled before it started");
            return Ok(SyncResult {
                success: false,
                errors: vec![CANCELLED.to_string()],
                duration_ms: elapsed_ms(started),
                ..SyncResult::default()
            });
        }
        self.state.begin_pass()?;
        let changed = std::mem::take(&mut *self.lock_changed());
        info!(changed = changed.len(), "Sync pass started");

        let outcome = self
            .execute_pass(self.state.config(), &session.server_info, &cancel, &changed)
            .await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.lock_changed().extend(changed);
                error!(error = %e, "Sync pass failed");
                self.state.finish_pass(Some(e.to_string()));
                return Ok(SyncResult {
                    success: false,
                    errors: vec![e.to_string()],
                    duration_ms: elapsed_ms(started),
                    ..SyncResult::default()
                });
            }
        };

        if cancel.is_cancelled() {
            self.lock_changed().extend(changed);
            result.errors.push(CANCELLED.to_string());
            info!("Sync pass cancelled");
        } else {
            self.state.set_last_sync(Utc::now());
        }
        self.state.finish_pass(None);

        result.success = result.errors.is_empty();
        result.duration_ms = elapsed_ms(started);
        info!(
            uploaded = result.items_uploaded,
            downloaded = result.items_downloaded,
            deleted = result.items_deleted,
            conflicts = result.conflicts,
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Sync pass finished"
        );
        Ok(result)
    }

    async fn execute_pass(
        &self,
        config: Arc<SyncConfig>,
        server: &ServerInfo,
        cancel: &CancellationToken,
        changed: &HashSet<String>,
    ) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();
        let ignore = IgnoreMatcher::from_config(&config)?;
        let selected = self.store.load_sync_folders().await?;
        let baselines = self.store.load_baselines().await?;

        // Step 1: both listings, or nothing
        self.fs
            .create_dir_all(&config.sync_folder)
            .await
            .map_err(|e| SyncError::ScanFailed(format!("sync folder: {e:#}")))?;
        let remote = self
            .remote
            .list_tree()
            .await
            .map_err(|e| self.remote_failure(e))?;
        let mut local = self
            .fs
            .scan(&config.sync_folder)
            .await
            .map_err(|e| SyncError::ScanFailed(format!("local listing: {e:#}")))?;
        self.fill_local_hashes(
            &config.sync_folder,
            &mut local,
            &baselines,
            &ignore,
            changed,
            cancel,
        )
        .await;
        if cancel.is_cancelled() {
            return Ok(result);
        }

        let candidates = scanner::scan(
            &baselines,
            &local,
            &remote,
            &ScanOptions {
                ignore: &ignore,
                selected_folders: &selected,
                detect_renames: config.transfer.detect_renames,
            },
        );
        info!(
            local = local.len(),
            remote = remote.len(),
            candidates = candidates.len(),
            "Scan complete"
        );

        // Step 2: decisions
        let open = self.registry.open_paths().await?;
        let resolver = self.resolver();
        let mut taken: HashSet<String> = local
            .iter()
            .map(|l| l.path.clone())
            .chain(remote.iter().map(|r| r.path.clone()))
            .collect();
        let mut queue = Vec::new();

        for (group, candidate) in candidates.iter().enumerate() {
            if open.iter().any(|p| path::is_within(candidate.path(), p)) {
                debug!(path = %candidate.path(), "Open conflict, leaving path alone");
                continue;
            }
            match resolver.decide(candidate, |p| taken.contains(p)) {
                Decision::Deferred(conflict) => {
                    self.registry.record(conflict).await?;
                    result.conflicts += 1;
                }
                Decision::Actions(actions) => {
                    taken.extend(actions.iter().map(|a| a.path().to_string()));
                    queue.extend(QueuedAction::group(group, candidate, actions));
                }
            }
        }

        // Step 3: transfers
        self.set_pending(&queue);
        if queue.is_empty() {
            debug!("Nothing to transfer");
            return Ok(result);
        }
        self.state.transition(EngineState::Syncing)?;
        self.state.start_progress(planned_sizes(&queue));
        self.state
            .set_operation(Some(format!("Syncing {} items", queue.len())));

        let scheduler = TransferScheduler::new(
            self.remote.clone(),
            self.fs.clone(),
            self.network.clone(),
            self.throttles.clone(),
            config,
            server.clone(),
            cancel.clone(),
        );
        let observer = PassObserver::new(self, ObserverMode::Pass);
        let report = scheduler.drain(&queue, &observer).await;
        let tally = observer.finish();

        result.items_uploaded = tally.uploaded;
        result.items_downloaded = tally.downloaded;
        result.items_deleted = tally.deleted;
        result.conflicts += tally.conflicts;
        result.errors = tally.errors;

        if let Some(e) = report.aborted {
            warn!(error = %e, "Server rejected the session, pass aborted");
            self.auth.invalidate();
            return Err(SyncError::NotAuthenticated);
        }
        Ok(result)
    }

    /// Fills the content hash of every local file.
    ///
    /// The baseline hash is reused when size and mtime still match and the
    /// watcher did not report the path.
    async fn fill_local_hashes(
        &self,
        root: &Path,
        local: &mut [LocalEntry],
        baselines: &[BaselineEntry],
        ignore: &IgnoreMatcher,
        changed: &HashSet<String>,
        cancel: &CancellationToken,
    ) {
        let known: HashMap<&str, &BaselineEntry> =
            baselines.iter().map(|b| (b.path.as_str(), b)).collect();
        let mut hashed = 0usize;

        for entry in local.iter_mut().filter(|e| !e.is_directory) {
            if cancel.is_cancelled() {
                return;
            }
            if ignore.is_ignored(&entry.path) {
                continue;
            }

            let forced = changed.iter().any(|c| path::is_within(&entry.path, c));
            if !forced {
                if let Some(b) = known.get(entry.path.as_str()) {
                    if !b.is_directory
                        && b.size == entry.size
                        && b.local_modified == Some(entry.modified)
                        && b.content_hash.is_some()
                    {
                        entry.content_hash = b.content_hash.clone();
                        continue;
                    }
                }
            }

            match self
                .fs
                .hash_file(&path::to_absolute(root, &entry.path))
                .await
            {
                Ok(hash) => {
                    entry.content_hash = Some(hash);
                    hashed += 1;
                }
                Err(e) => warn!(path = %entry.path, error = %e, "Failed to hash local file"),
            }
        }
        debug!(hashed, "Local hashes filled");
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    /// Settles an open conflict with the user's choice.
    ///
    /// Runs the resolution's actions against the current state of both sides;
    /// on success the conflict is removed and one history entry is appended.
    #[instrument(skip(self))]
    pub async fn resolve_conflict(
        &self,
        id: &str,
        choice: ConflictResolution,
    ) -> Result<(), SyncError> {
        let _guard = self.pass_lock.lock().await;
        let session = self.auth.ensure_session().await?;
        let conflict = self.registry.claim(id).await?;

        match self
            .apply_resolution(&conflict, choice, &session.server_info)
            .await
        {
            Ok(()) => {
                self.registry.complete(id).await?;
                let direction = match choice {
                    ConflictResolution::KeepLocal => SyncDirection::Upload,
                    ConflictResolution::KeepRemote => SyncDirection::Download,
                    ConflictResolution::KeepBoth => SyncDirection::None,
                };
                self.state
                    .append_history(&SyncHistoryEntry::success(
                        HistoryOperation::ConflictResolved,
                        &conflict.item_path,
                        direction,
                    ))
                    .await?;
                info!(path = %conflict.item_path, choice = %choice, "Conflict resolved");
                Ok(())
            }
            Err(e) => {
                warn!(path = %conflict.item_path, error = %e, "Conflict resolution failed");
                let refreshed = match &e {
                    SyncError::Conflict(ConflictError::VersionChanged { actual, .. }) => {
                        Some(SyncConflict {
                            remote_etag: actual.clone(),
                            ..conflict.clone()
                        })
                    }
                    _ => None,
                };
                self.registry.release(id, refreshed).await?;
                Err(e)
            }
        }
    }

    async fn apply_resolution(
        &self,
        conflict: &SyncConflict,
        choice: ConflictResolution,
        server: &ServerInfo,
    ) -> Result<(), SyncError> {
        let config = self.state.config();
        let item_path = conflict.item_path.as_str();

        let mut local = self.fs.stat(&config.sync_folder, item_path).await?;
        if let Some(entry) = local.as_mut().filter(|l| !l.is_directory) {
            entry.content_hash = Some(
                self.fs
                    .hash_file(&path::to_absolute(&config.sync_folder, item_path))
                    .await?,
            );
        }
        let remote = self
            .remote
            .stat(item_path)
            .await
            .map_err(|e| self.remote_failure(e))?;
        let baseline = self
            .store
            .load_baselines()
            .await?
            .into_iter()
            .find(|b| b.path == item_path);
        let taken = self.names_near(&config.sync_folder, item_path).await;

        let actions = self.resolver().plan_resolution(
            conflict,
            choice,
            local.as_ref(),
            remote.as_ref(),
            |p| taken.contains(p),
        )?;
        let candidate = ScanCandidate {
            item: SyncItem::from_snapshots(
                item_path,
                local.as_ref(),
                remote.as_ref(),
                SyncDirection::None,
            ),
            local_change: ChangeKind::Modified,
            remote_change: ChangeKind::Modified,
            moved_from: None,
            local,
            remote,
            baseline,
        };
        let queue = QueuedAction::group(0, &candidate, actions);

        let cancel = CancellationToken::new();
        *self.lock_cancel() = cancel.clone();
        let scheduler = TransferScheduler::new(
            self.remote.clone(),
            self.fs.clone(),
            self.network.clone(),
            self.throttles.clone(),
            config,
            server.clone(),
            cancel.clone(),
        );
        let observer = PassObserver::new(self, ObserverMode::Resolution);
        let report = scheduler.drain(&queue, &observer).await;
        let tally = observer.finish();

        if report.aborted.is_some() {
            self.auth.invalidate();
            return Err(SyncError::NotAuthenticated);
        }
        if report.cancelled {
            return Err(ConflictError::ResolutionFailed(CANCELLED.into()).into());
        }
        if report.failed > 0 || report.skipped > 0 {
            return Err(ConflictError::ResolutionFailed(tally.errors.join("; ")).into());
        }
        Ok(())
    }

    /// Names in use next to `item_path` on either side, for conflict copies.
    async fn names_near(&self, root: &Path, item_path: &str) -> HashSet<String> {
        let parent = path::parent(item_path).unwrap_or("");
        let mut taken = HashSet::new();
        if let Ok(entries) = self.fs.scan(&path::to_absolute(root, parent)).await {
            taken.extend(
                entries
                    .into_iter()
                    .filter(|e| !e.path.contains('/'))
                    .map(|e| path::join(parent, &e.path)),
            );
        }
        match self.remote.list_directory(parent).await {
            Ok(entries) => taken.extend(entries.into_iter().map(|e| e.path)),
            Err(e) => debug!(parent = %parent, error = %e, "Remote siblings unavailable"),
        }
        taken
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Top-level remote folders offered for selective sync.
    pub async fn remote_folders(&self) -> Result<Vec<RemoteFolder>, SyncError> {
        self.auth.ensure_session().await?;
        let selected: HashSet<String> = self.store.load_sync_folders().await?.into_iter().collect();
        let top = self
            .remote
            .list_directory("")
            .await
            .map_err(|e| self.remote_failure(e))?;

        let mut folders = Vec::new();
        for entry in top.into_iter().filter(|e| e.is_directory) {
            let children = self
                .remote
                .list_directory(&entry.path)
                .await
                .map_err(|e| self.remote_failure(e))?;
            folders.push(RemoteFolder {
                id: entry.path.clone(),
                name: path::file_name(&entry.path).to_string(),
                size_bytes: children
                    .iter()
                    .filter(|c| !c.is_directory)
                    .map(|c| c.size)
                    .sum(),
                item_count: u32::try_from(children.len()).unwrap_or(u32::MAX),
                is_selected: selected.is_empty() || selected.contains(&entry.path),
                path: entry.path,
            });
        }
        Ok(folders)
    }

    /// Totals over the synced tree and the last pass
    pub async fn stats(&self) -> Result<SyncStats, SyncError> {
        let baselines = self.store.load_baselines().await?;
        let pending = self.pending_items();
        let status = self.state.status();
        let mut stats = self.lock_stats().clone();

        stats.total_files = baselines.iter().filter(|b| !b.is_directory).count() as u64;
        stats.total_folders = baselines.iter().filter(|b| b.is_directory).count() as u64;
        stats.total_size = baselines.iter().map(|b| b.size).sum();
        stats.pending_uploads = count(&pending, |i| {
            i.direction == SyncDirection::Upload && i.status.is_outstanding()
        });
        stats.pending_downloads = count(&pending, |i| {
            i.direction == SyncDirection::Download && i.status.is_outstanding()
        });
        stats.errors = count(&pending, |i| matches!(i.status, SyncStatus::Error(_)));
        stats.conflicts = u32::try_from(self.registry.count().await?).unwrap_or(u32::MAX);
        stats.last_sync = status.last_sync_time;
        stats.next_sync = status.next_sync_time;
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn remote_failure(&self, e: RemoteError) -> SyncError {
        if matches!(e, RemoteError::Unauthorized) {
            self.auth.invalidate();
            SyncError::NotAuthenticated
        } else {
            SyncError::ScanFailed(format!("remote listing: {e}"))
        }
    }

    fn resolver(&self) -> ConflictResolver {
        self.resolver
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_pending(&self, queue: &[QueuedAction]) {
        let mut pending = self.lock_pending();
        pending.clear();
        for (idx, q) in queue.iter().enumerate() {
            if q.action.kind.touches_storage() {
                let mut item = q.action.item.clone();
                item.status = SyncStatus::Pending;
                pending.insert(idx, item);
            }
        }
    }

    fn update_pending(&self, index: usize, status: Option<SyncStatus>) {
        let mut pending = self.lock_pending();
        match status {
            Some(status) => {
                if let Some(item) = pending.get_mut(&index) {
                    item.status = status;
                }
            }
            None => {
                pending.remove(&index);
            }
        }
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_changed(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.changed_paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, BTreeMap<usize, SyncItem>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, SyncStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn count(items: &[SyncItem], pred: impl Fn(&SyncItem) -> bool) -> u32 {
    u32::try_from(items.iter().filter(|i| pred(i)).count()).unwrap_or(u32::MAX)
}

fn history_operation(kind: &ActionKind) -> Option<HistoryOperation> {
    match kind {
        ActionKind::Upload | ActionKind::CreateRemoteDir => Some(HistoryOperation::Upload),
        ActionKind::Download | ActionKind::CreateLocalDir => Some(HistoryOperation::Download),
        ActionKind::DeleteRemote | ActionKind::DeleteLocal => Some(HistoryOperation::Delete),
        ActionKind::MoveRemote { .. }
        | ActionKind::MoveLocal { .. }
        | ActionKind::RenameLocal { .. } => Some(HistoryOperation::Move),
        ActionKind::RecordBaseline | ActionKind::ForgetBaseline => None,
    }
}

// ============================================================================
// PassObserver
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverMode {
    /// A scheduled pass: drives state, progress, history and counters
    Pass,
    /// A conflict resolution: baselines only
    Resolution,
}

#[derive(Debug, Default)]
struct Tally {
    uploaded: u32,
    downloaded: u32,
    deleted: u32,
    conflicts: u32,
    errors: Vec<String>,
}

/// Applies the outcome of each action as it finishes
struct PassObserver<'a> {
    engine: &'a SyncEngine,
    mode: ObserverMode,
    tally: Mutex<Tally>,
}

impl<'a> PassObserver<'a> {
    fn new(engine: &'a SyncEngine, mode: ObserverMode) -> Self {
        Self {
            engine,
            mode,
            tally: Mutex::new(Tally::default()),
        }
    }

    fn finish(self) -> Tally {
        self.tally.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn with_tally(&self, f: impl FnOnce(&mut Tally)) {
        f(&mut self.tally.lock().unwrap_or_else(|e| e.into_inner()));
    }

    async fn apply_baseline(&self, path: &str, change: &BaselineChange) -> anyhow::Result<()> {
        let store = &self.engine.store;
        match change {
            BaselineChange::Keep => Ok(()),
            BaselineChange::Save(entry) => store.save_baseline(entry).await,
            BaselineChange::Remove => store.remove_baseline(path).await,
            BaselineChange::Replace { from, entry } => {
                store.remove_baseline(from).await?;
                store.save_baseline(entry).await
            }
        }
    }

    async fn record_history(&self, entry: SyncHistoryEntry) {
        if self.mode != ObserverMode::Pass {
            return;
        }
        if let Err(e) = self.engine.state.append_history(&entry).await {
            warn!(path = %entry.item_path, error = %e, "Failed to append history");
        }
    }

    async fn succeeded(&self, index: usize, queued: &QueuedAction, outcome: &ActionOutcome) {
        let kind = &queued.action.kind;
        if let Err(e) = self.apply_baseline(queued.path(), &outcome.baseline).await {
            error!(path = %queued.path(), error = %e, "Failed to update baseline");
            self.with_tally(|t| t.errors.push(format!("{}: baseline: {e:#}", queued.path())));
        }

        match kind.direction() {
            SyncDirection::Upload => self.engine.lock_stats().record_transfer(outcome.bytes, 0),
            SyncDirection::Download => self.engine.lock_stats().record_transfer(0, outcome.bytes),
            SyncDirection::None => {}
        }

        if self.mode == ObserverMode::Pass {
            self.engine.update_pending(index, None);
            self.with_tally(|t| match kind {
                ActionKind::Upload | ActionKind::CreateRemoteDir | ActionKind::MoveRemote { .. } => {
                    t.uploaded += 1
                }
                ActionKind::Download | ActionKind::CreateLocalDir | ActionKind::MoveLocal { .. } => {
                    t.downloaded += 1
                }
                ActionKind::DeleteRemote | ActionKind::DeleteLocal => t.deleted += 1,
                _ => {}
            });
        }

        if let Some(op) = history_operation(kind) {
            self.record_history(SyncHistoryEntry::success(
                op,
                queued.path(),
                queued.action.item.direction,
            ))
            .await;
        }
    }

    async fn failed(&self, index: usize, queued: &QueuedAction, err: &TransferError) {
        let kind = &queued.action.kind;
        let escalate = self.mode == ObserverMode::Pass
            && matches!(err, TransferError::ChecksumMismatch { .. })
            && matches!(
                kind,
                ActionKind::Upload | ActionKind::Download | ActionKind::DeleteLocal
            );

        if escalate {
            warn!(path = %queued.path(), "Content kept changing during transfer, recording conflict");
            match self.engine.registry.record(queued.to_conflict()).await {
                Ok(_) => {
                    self.engine.update_pending(index, None);
                    self.with_tally(|t| t.conflicts += 1);
                    return;
                }
                Err(e) => error!(path = %queued.path(), error = %e, "Failed to record conflict"),
            }
        }

        let message = err.to_string();
        self.with_tally(|t| t.errors.push(format!("{}: {message}", queued.path())));
        if self.mode == ObserverMode::Pass {
            self.engine
                .update_pending(index, Some(SyncStatus::Error(message.clone())));
        }
        if let Some(op) = history_operation(kind) {
            self.record_history(SyncHistoryEntry::failure(
                op,
                queued.path(),
                queued.action.item.direction,
                message,
            ))
            .await;
        }
    }
}

#[async_trait::async_trait]
impl TransferObserver for PassObserver<'_> {
    async fn item_started(&self, index: usize, queued: &QueuedAction) {
        if self.mode == ObserverMode::Pass {
            self.engine
                .update_pending(index, Some(SyncStatus::InProgress));
            self.engine.state.set_operation(Some(format!(
                "{} {}",
                queued.action.kind,
                queued.path()
            )));
        }
    }

    fn bytes_transferred(&self, index: usize, bytes: u64) {
        if self.mode == ObserverMode::Pass {
            self.engine.state.record_bytes(index, bytes);
        }
    }

    async fn item_finished(
        &self,
        index: usize,
        queued: &QueuedAction,
        result: &Result<ActionOutcome, TransferError>,
    ) {
        match result {
            Ok(outcome) => self.succeeded(index, queued, outcome).await,
            Err(TransferError::Cancelled) => {
                if self.mode == ObserverMode::Pass {
                    self.engine.update_pending(index, Some(SyncStatus::Pending));
                }
            }
            Err(e) => self.failed(index, queued, e).await,
        }
        if self.mode == ObserverMode::Pass {
            self.engine.state.complete_item(index);
        }
    }

    async fn item_skipped(&self, index: usize, queued: &QueuedAction) {
        debug!(path = %queued.path(), "Action deferred to a later pass");
        if self.mode == ObserverMode::Pass {
            self.engine.update_pending(index, Some(SyncStatus::Pending));
            self.engine.state.complete_item(index);
        } else {
            self.with_tally(|t| t.errors.push(format!("{}: not attempted", queued.path())));
        }
    }

    async fn paused(&self, reason: SuspendReason) {
        if self.mode == ObserverMode::Pass {
            if let Err(e) = self.engine.state.transition(EngineState::Paused(reason)) {
                debug!(error = %e, "Pause not reflected in state");
            }
        }
    }

    async fn resumed(&self) {
        if self.mode == ObserverMode::Pass {
            if let Err(e) = self.engine.state.transition(EngineState::Syncing) {
                debug!(error = %e, "Resume not reflected in state");
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
