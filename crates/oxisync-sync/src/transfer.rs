//! Transfer scheduler
//!
//! Drains the action queue of a pass, one action at a time:
//!
//! 1. wait while the network policy suspends transfers
//! 2. execute the action, retrying transient failures with exponential backoff
//! 3. report the outcome to a [`TransferObserver`]
//!
//! Actions planned for the same candidate form a group. When one of them
//! fails the rest of its group is skipped, so a failed conflict rename never
//! lets the following download overwrite the local copy.
//!
//! ## Transfers
//!
//! - **Uploads** stream the planned ranges through a remote upload session;
//!   the file only appears remotely on commit. The content read is re-hashed
//!   and must match the hash the plan was made with.
//! - **Downloads** write into a staging file next to the destination which
//!   is verified and then renamed over it. Any failure discards the staging
//!   file, so the destination is never partially written.
//!
//! Cancellation is checked between actions and before every chunk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{
    ActionKind, BaselineEntry, ChangeKind, ConflictType, LocalEntry, RemoteEntry, RemoteError,
    ScanCandidate, ServerInfo, SuspendReason, SyncAction, SyncConflict, SyncDirection,
};
use oxisync_core::ports::{
    ILocalFileSystem, INetworkMonitor, IRemoteStorage, StagedFile, UploadMode, UploadSession,
};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::network::suspend_reason;
use crate::planner::{DeltaPlanner, PlanContext, TransferMode, TransferPlan};
use crate::throttle::BandwidthThrottle;
use crate::TransferError;

// ============================================================================
// Queue entries
// ============================================================================

/// An action together with the snapshot records it was planned against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedAction {
    pub action: SyncAction,
    /// Candidate the action was planned for
    pub group: usize,
    pub last_in_group: bool,
    /// Local state expected at the action's path when it runs
    pub local: Option<LocalEntry>,
    /// Remote state expected at the action's path when it runs
    pub remote: Option<RemoteEntry>,
    pub baseline: Option<BaselineEntry>,
}

impl QueuedAction {
    /// Queues the actions planned for one candidate.
    ///
    /// Each action sees the state its predecessors leave behind: after a
    /// local delete or rename the original path is empty locally, and a
    /// conflict copy carries the renamed local record.
    pub fn group(group: usize, candidate: &ScanCandidate, actions: Vec<SyncAction>) -> Vec<Self> {
        let origin = candidate.path().to_string();
        let mut local = candidate.local.clone();
        let mut remote = candidate.remote.clone();
        let mut renamed: Option<LocalEntry> = None;
        let count = actions.len();

        let mut queued = Vec::with_capacity(count);
        for (idx, action) in actions.into_iter().enumerate() {
            let at_origin = action.path() == origin;
            let entry = if at_origin {
                Self {
                    group,
                    last_in_group: idx + 1 == count,
                    local: local.clone(),
                    remote: remote.clone(),
                    baseline: candidate.baseline.clone(),
                    action,
                }
            } else {
                Self {
                    group,
                    last_in_group: idx + 1 == count,
                    local: renamed.clone().filter(|r| r.path == action.path()),
                    remote: None,
                    baseline: None,
                    action,
                }
            };

            if at_origin {
                match &entry.action.kind {
                    ActionKind::DeleteLocal => local = None,
                    ActionKind::DeleteRemote => remote = None,
                    ActionKind::RenameLocal { to } => {
                        renamed = local.take().map(|mut l| {
                            l.path = to.clone();
                            l
                        });
                    }
                    _ => {}
                }
            }
            queued.push(entry);
        }
        queued
    }

    pub fn path(&self) -> &str {
        self.action.path()
    }

    /// Bytes this action is expected to move
    pub fn planned_bytes(&self) -> u64 {
        if self.action.kind.is_transfer() {
            self.action.item.size
        } else {
            0
        }
    }

    /// Conflict record for an action whose inputs kept changing under it
    pub fn to_conflict(&self) -> SyncConflict {
        let conflict_type = match self.action.kind {
            ActionKind::DeleteLocal => ConflictType::RemoteDeletedLocalModified,
            _ => ConflictType::BothModified,
        };
        let candidate = ScanCandidate {
            item: self.action.item.clone(),
            local_change: ChangeKind::Modified,
            remote_change: ChangeKind::Modified,
            moved_from: None,
            local: self.local.clone(),
            remote: self.remote.clone(),
            baseline: self.baseline.clone(),
        };
        SyncConflict::from_candidate(&candidate, conflict_type)
    }
}

/// How the baseline store must change after an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineChange {
    Keep,
    Save(BaselineEntry),
    Remove,
    /// A move: drop the old path and record the new one
    Replace { from: String, entry: BaselineEntry },
}

/// Result of a successful action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Bytes moved over the network
    pub bytes: u64,
    pub baseline: BaselineChange,
    /// The rest of the group must wait for a later pass
    pub halt_group: bool,
}

impl ActionOutcome {
    fn new(bytes: u64, baseline: BaselineChange) -> Self {
        Self {
            bytes,
            baseline,
            halt_group: false,
        }
    }
}

/// Summary of one drain
#[derive(Debug, Default)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    /// Set when the server rejected the session; the drain stopped there
    pub aborted: Option<TransferError>,
}

/// Receives the progress of a drain
#[async_trait::async_trait]
pub trait TransferObserver: Send + Sync {
    async fn item_started(&self, index: usize, queued: &QueuedAction);

    /// `bytes` moved so far for item `index`
    fn bytes_transferred(&self, index: usize, bytes: u64);

    async fn item_finished(
        &self,
        index: usize,
        queued: &QueuedAction,
        result: &Result<ActionOutcome, TransferError>,
    );

    /// Item not attempted because an earlier action of its group did not complete
    async fn item_skipped(&self, index: usize, queued: &QueuedAction);

    async fn paused(&self, reason: SuspendReason);

    async fn resumed(&self);
}

/// Per-direction bandwidth limits shared by every drain
#[derive(Debug, Clone)]
pub struct Throttles {
    pub upload: Arc<BandwidthThrottle>,
    pub download: Arc<BandwidthThrottle>,
}

impl Throttles {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            upload: Arc::new(BandwidthThrottle::new(
                "upload",
                config.upload_limit_bytes_per_sec(),
            )),
            download: Arc::new(BandwidthThrottle::new(
                "download",
                config.download_limit_bytes_per_sec(),
            )),
        }
    }

    pub fn retune(&self, config: &SyncConfig) {
        self.upload.set_rate(config.upload_limit_bytes_per_sec());
        self.download.set_rate(config.download_limit_bytes_per_sec());
    }

    /// Lifts both limits (shutdown)
    pub fn clear(&self) {
        self.upload.set_rate(0);
        self.download.set_rate(0);
    }
}

// ============================================================================
// TransferScheduler
// ============================================================================

/// Executes queued actions against the local tree and the remote storage
pub struct TransferScheduler {
    remote: Arc<dyn IRemoteStorage>,
    fs: Arc<dyn ILocalFileSystem>,
    network: Arc<dyn INetworkMonitor>,
    throttles: Throttles,
    config: Arc<SyncConfig>,
    server: ServerInfo,
    planner: DeltaPlanner,
    root: PathBuf,
    cancel: CancellationToken,
}

impl TransferScheduler {
    pub fn new(
        remote: Arc<dyn IRemoteStorage>,
        fs: Arc<dyn ILocalFileSystem>,
        network: Arc<dyn INetworkMonitor>,
        throttles: Throttles,
        config: Arc<SyncConfig>,
        server: ServerInfo,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            planner: DeltaPlanner::from_config(&config),
            root: config.sync_folder.clone(),
            remote,
            fs,
            network,
            throttles,
            config,
            server,
            cancel,
        }
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        oxisync_core::domain::path::to_absolute(&self.root, relative)
    }

    fn chunk_size(&self) -> u64 {
        self.config.transfer.chunk_size.max(1)
    }

    /// Runs every queued action in order.
    #[instrument(skip_all, fields(actions = queue.len()))]
    pub async fn drain(
        &self,
        queue: &[QueuedAction],
        observer: &dyn TransferObserver,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        let mut halted_groups: Vec<usize> = Vec::new();

        for (index, queued) in queue.iter().enumerate() {
            if self.cancel.is_cancelled() || !self.wait_for_network(observer).await {
                report.cancelled = true;
                break;
            }

            if halted_groups.contains(&queued.group) {
                debug!(path = %queued.path(), kind = %queued.action.kind, "Skipping action of halted group");
                observer.item_skipped(index, queued).await;
                report.skipped += 1;
                continue;
            }

            observer.item_started(index, queued).await;
            let result = self.execute_with_retry(index, queued, observer).await;
            observer.item_finished(index, queued, &result).await;

            match result {
                Ok(outcome) => {
                    report.completed += 1;
                    if outcome.halt_group && !queued.last_in_group {
                        halted_groups.push(queued.group);
                    }
                }
                Err(TransferError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) if e.is_auth_failure() => {
                    warn!(path = %queued.path(), "Server rejected the session, aborting drain");
                    report.failed += 1;
                    report.aborted = Some(e);
                    break;
                }
                Err(_) => {
                    report.failed += 1;
                    if !queued.last_in_group {
                        halted_groups.push(queued.group);
                    }
                }
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Transfer queue drained"
        );
        report
    }

    /// Blocks while the network policy suspends transfers.
    ///
    /// Returns `false` when cancelled while waiting.
    async fn wait_for_network(&self, observer: &dyn TransferObserver) -> bool {
        let poll = Duration::from_secs(self.config.transfer.network_poll_secs.max(1));
        let mut suspended: Option<SuspendReason> = None;

        loop {
            match suspend_reason(&self.config, self.network.current()) {
                None => {
                    if suspended.is_some() {
                        info!("Network policy allows transfers again, resuming");
                        observer.resumed().await;
                    }
                    return true;
                }
                Some(reason) => {
                    if suspended != Some(reason) {
                        info!(reason = %reason, "Transfers suspended by network policy");
                        observer.paused(reason).await;
                        suspended = Some(reason);
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
    }

    async fn execute_with_retry(
        &self,
        index: usize,
        queued: &QueuedAction,
        observer: &dyn TransferObserver,
    ) -> Result<ActionOutcome, TransferError> {
        let max_retries = self.config.transfer.max_retries;
        let base_ms = self.config.transfer.retry_base_delay_ms;
        let mut attempt: u32 = 0;

        loop {
            match self.execute(index, queued, observer).await {
                Ok(outcome) => {
                    if attempt > 0 {
                        info!(path = %queued.path(), attempt, "Action succeeded after retry");
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
                    warn!(
                        path = %queued.path(),
                        attempt,
                        delay_ms,
                        error = %e,
                        "Transient error, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(path = %queued.path(), kind = %queued.action.kind, error = %e, "Action failed");
                    return Err(e);
                }
            }
        }
    }

    #[instrument(skip(self, queued, observer), fields(path = %queued.path(), kind = %queued.action.kind))]
    async fn execute(
        &self,
        index: usize,
        queued: &QueuedAction,
        observer: &dyn TransferObserver,
    ) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        match &queued.action.kind {
            ActionKind::Upload => self.upload(index, queued, observer).await,
            ActionKind::Download => self.download(index, queued, observer).await,
            ActionKind::DeleteRemote => self.delete_remote(queued).await,
            ActionKind::DeleteLocal => self.delete_local(queued).await,
            ActionKind::CreateRemoteDir => {
                self.remote.create_directory(path).await?;
                Ok(ActionOutcome::new(
                    0,
                    BaselineChange::Save(BaselineEntry::directory(path)),
                ))
            }
            ActionKind::CreateLocalDir => {
                self.fs.create_dir_all(&self.absolute(path)).await?;
                Ok(ActionOutcome::new(
                    0,
                    BaselineChange::Save(BaselineEntry::directory(path)),
                ))
            }
            ActionKind::MoveRemote { from } => self.move_remote(from, queued).await,
            ActionKind::MoveLocal { from } => self.move_local(from, queued).await,
            ActionKind::RenameLocal { to } => {
                let target = self.absolute(to);
                if self.fs.exists(&target).await {
                    return Err(anyhow::anyhow!("{to} already exists").into());
                }
                self.fs.rename(&self.absolute(path), &target).await?;
                Ok(ActionOutcome::new(0, BaselineChange::Keep))
            }
            ActionKind::RecordBaseline => self.record_baseline(queued).await,
            ActionKind::ForgetBaseline => Ok(ActionOutcome::new(0, BaselineChange::Remove)),
        }
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    async fn upload(
        &self,
        index: usize,
        queued: &QueuedAction,
        observer: &dyn TransferObserver,
    ) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        let abs = self.absolute(path);
        let current = self
            .fs
            .stat(&self.root, path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{path} disappeared before upload"))?;
        if current.is_directory {
            return Err(anyhow::anyhow!("{path} is now a directory").into());
        }

        // The scan hash still describes the file when size and mtime agree
        let expected = match queued
            .local
            .as_ref()
            .filter(|scanned| same_file(scanned, &current))
            .and_then(|scanned| scanned.content_hash.clone())
        {
            Some(hash) => hash,
            None => self.fs.hash_file(&abs).await?,
        };
        let local = LocalEntry {
            content_hash: Some(expected.clone()),
            ..current
        };

        let mut ctx = PlanContext {
            server: &self.server,
            baseline: queued.baseline.as_ref(),
            local: Some(&local),
            remote: queued.remote.as_ref(),
            local_blocks: None,
            remote_signature: None,
        };
        let blocks = if self.planner.delta_candidate(SyncDirection::Upload, &ctx)
            || self.planner.tracks_blocks(local.size)
        {
            Some(
                self.fs
                    .block_hashes(&abs, self.planner.block_size())
                    .await?,
            )
        } else {
            None
        };
        ctx.local_blocks = blocks.as_deref();
        let plan = self.planner.plan(path, SyncDirection::Upload, &ctx);

        let mode = match plan.mode {
            TransferMode::Full => UploadMode::Full,
            TransferMode::Delta => UploadMode::Delta,
        };
        let if_match = queued
            .remote
            .as_ref()
            .filter(|r| !r.is_directory)
            .and_then(|r| r.etag.as_deref());
        let session = self
            .remote
            .begin_upload(path, mode, plan.total_bytes, if_match)
            .await?;

        let remote_entry = match self
            .run_upload(index, &abs, &plan, &session, &expected, observer)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(abort_err) = self.remote.abort_upload(&session).await {
                    warn!(path = %path, error = %abort_err, "Failed to abort upload session");
                }
                return Err(e);
            }
        };

        let mut baseline = BaselineEntry::from_entries(&local, &remote_entry);
        if let Some(blocks) = blocks.filter(|_| self.planner.tracks_blocks(local.size)) {
            baseline.block_size = self.planner.block_size();
            baseline.block_hashes = blocks;
        }
        debug!(path = %path, bytes = plan.transfer_bytes, mode = ?plan.mode, "Upload committed");
        Ok(ActionOutcome::new(
            plan.transfer_bytes,
            BaselineChange::Save(baseline),
        ))
    }

    /// Streams the plan's ranges, verifies what was read and commits.
    async fn run_upload(
        &self,
        index: usize,
        abs: &Path,
        plan: &TransferPlan,
        session: &UploadSession,
        expected: &str,
        observer: &dyn TransferObserver,
    ) -> Result<RemoteEntry, TransferError> {
        let chunk = self.chunk_size();
        let mut hasher = (plan.mode == TransferMode::Full).then(Sha256::new);
        let mut sent: u64 = 0;

        for range in &plan.ranges {
            let mut offset = range.offset;
            while offset < range.end() {
                if self.cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                let len = self.throttles.upload.chunk_len(chunk).min(range.end() - offset);
                self.throttles.upload.acquire(len, &self.cancel).await?;
                let data = self.fs.read_range(abs, offset, len).await?;
                if (data.len() as u64) < len {
                    return Err(self.mismatch(&plan.path, expected, "file shrank during upload"));
                }
                if let Some(h) = hasher.as_mut() {
                    h.update(&data);
                }
                self.remote.upload_chunk(session, offset, data).await?;
                offset += len;
                sent += len;
                observer.bytes_transferred(index, sent);
            }
        }

        let actual = match hasher {
            Some(h) => format!("{:x}", h.finalize()),
            None => self.fs.hash_file(abs).await?,
        };
        if actual != expected {
            return Err(self.mismatch(&plan.path, expected, &actual));
        }

        Ok(self.remote.commit_upload(session).await?)
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    async fn download(
        &self,
        index: usize,
        queued: &QueuedAction,
        observer: &dyn TransferObserver,
    ) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        let dest = self.absolute(path);
        let remote = self
            .remote
            .stat(path)
            .await?
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        if remote.is_directory {
            return Err(anyhow::anyhow!("remote {path} is now a directory").into());
        }

        let mut ctx = PlanContext {
            server: &self.server,
            baseline: queued.baseline.as_ref(),
            local: queued.local.as_ref(),
            remote: Some(&remote),
            local_blocks: None,
            remote_signature: None,
        };
        let signature = if self.planner.delta_candidate(SyncDirection::Download, &ctx) {
            match self.remote.signature(path, self.planner.block_size()).await {
                Ok(sig) => Some(sig),
                Err(e) => {
                    debug!(path = %path, error = %e, "No remote signature, downloading whole file");
                    None
                }
            }
        } else {
            None
        };
        ctx.remote_signature = signature.as_ref();
        let plan = self.planner.plan(path, SyncDirection::Download, &ctx);

        let staged = self
            .fs
            .begin_staging(&dest, plan.mode == TransferMode::Delta)
            .await?;
        let hash = match self.fill_staged(index, &plan, &staged, queued, observer).await {
            Ok(hash) => hash,
            Err(e) => {
                if let Err(discard_err) = self.fs.discard_staged(&staged).await {
                    warn!(path = %path, error = %discard_err, "Failed to discard staging file");
                }
                return Err(e);
            }
        };

        let written = self
            .fs
            .stat(&self.root, path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{path} missing after commit"))?;
        let local = LocalEntry {
            content_hash: Some(hash),
            ..written
        };
        let mut baseline = BaselineEntry::from_entries(&local, &remote);
        if self.planner.tracks_blocks(local.size) {
            baseline.block_size = self.planner.block_size();
            baseline.block_hashes = match signature {
                Some(sig) if sig.size == local.size => sig.blocks,
                _ => {
                    self.fs
                        .block_hashes(&dest, self.planner.block_size())
                        .await?
                }
            };
        }
        debug!(path = %path, bytes = plan.transfer_bytes, mode = ?plan.mode, "Download committed");
        Ok(ActionOutcome::new(
            plan.transfer_bytes,
            BaselineChange::Save(baseline),
        ))
    }

    /// Fills, verifies and commits the staging file; returns the content hash.
    async fn fill_staged(
        &self,
        index: usize,
        plan: &TransferPlan,
        staged: &StagedFile,
        queued: &QueuedAction,
        observer: &dyn TransferObserver,
    ) -> Result<String, TransferError> {
        let chunk = self.chunk_size();
        let mut received: u64 = 0;

        for range in &plan.ranges {
            let mut offset = range.offset;
            while offset < range.end() {
                if self.cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                let len = self.throttles.download.chunk_len(chunk).min(range.end() - offset);
                self.throttles.download.acquire(len, &self.cancel).await?;
                let data = self.remote.download_range(&plan.path, offset, len).await?;
                if data.len() as u64 != len {
                    return Err(TransferError::ChecksumMismatch {
                        path: plan.path.clone(),
                        expected: format!("{len} bytes at {offset}"),
                        actual: format!("{} bytes", data.len()),
                    });
                }
                self.fs.write_staged(staged, offset, &data).await?;
                offset += len;
                received += len;
                observer.bytes_transferred(index, received);
            }
        }

        let actual = self.fs.finish_staged(staged, plan.total_bytes).await?;
        if let Some(expected) = &plan.expected_hash {
            if *expected != actual {
                return Err(self.mismatch(&plan.path, expected, &actual));
            }
        }

        self.ensure_local_unchanged(queued).await?;
        self.fs.commit_staged(staged).await?;
        Ok(actual)
    }

    // ------------------------------------------------------------------
    // Deletes, moves, baselines
    // ------------------------------------------------------------------

    async fn delete_remote(&self, queued: &QueuedAction) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        if queued.remote.as_ref().is_some_and(|r| r.is_directory)
            && !self.remote.list_directory(path).await?.is_empty()
        {
            info!(path = %path, "Remote directory not empty, leaving it in place");
            return Ok(self.kept_directory(queued));
        }
        self.remote.delete(path).await?;
        Ok(ActionOutcome::new(0, BaselineChange::Remove))
    }

    async fn delete_local(&self, queued: &QueuedAction) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        if !queued.local.as_ref().is_some_and(|l| l.is_directory) {
            self.ensure_local_unchanged(queued).await?;
        }
        if self.fs.remove(&self.absolute(path)).await? {
            return Ok(ActionOutcome::new(0, BaselineChange::Remove));
        }
        info!(path = %path, "Local directory not empty, leaving it in place");
        Ok(self.kept_directory(queued))
    }

    /// A directory delete that could not happen yet. A type change keeps
    /// its baseline so the next pass retries it once the children are gone.
    fn kept_directory(&self, queued: &QueuedAction) -> ActionOutcome {
        if queued.last_in_group {
            ActionOutcome::new(0, BaselineChange::Remove)
        } else {
            ActionOutcome {
                bytes: 0,
                baseline: BaselineChange::Keep,
                halt_group: true,
            }
        }
    }

    async fn move_remote(
        &self,
        from: &str,
        queued: &QueuedAction,
    ) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        self.remote.move_item(from, path).await?;
        let remote = self
            .remote
            .stat(path)
            .await?
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        let local = match queued.local.clone() {
            Some(l) => l,
            None => self
                .fs
                .stat(&self.root, path)
                .await?
                .ok_or_else(|| anyhow::anyhow!("{path} disappeared after move"))?,
        };
        let entry = self.file_baseline(&local, &remote).await?;
        Ok(ActionOutcome::new(
            0,
            BaselineChange::Replace {
                from: from.to_string(),
                entry,
            },
        ))
    }

    async fn move_local(
        &self,
        from: &str,
        queued: &QueuedAction,
    ) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        let target = self.absolute(path);
        if self.fs.exists(&target).await {
            return Err(anyhow::anyhow!("{path} already exists locally").into());
        }
        self.fs.rename(&self.absolute(from), &target).await?;
        let local = self
            .fs
            .stat(&self.root, path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{path} missing after rename"))?;
        let remote = match queued.remote.clone() {
            Some(r) => r,
            None => self
                .remote
                .stat(path)
                .await?
                .ok_or_else(|| RemoteError::NotFound(path.to_string()))?,
        };
        let entry = self.file_baseline(&local, &remote).await?;
        Ok(ActionOutcome::new(
            0,
            BaselineChange::Replace {
                from: from.to_string(),
                entry,
            },
        ))
    }

    async fn record_baseline(&self, queued: &QueuedAction) -> Result<ActionOutcome, TransferError> {
        let path = queued.path();
        let entry = match (queued.local.as_ref(), queued.remote.as_ref()) {
            (Some(l), Some(r)) if !l.is_directory && !r.is_directory => {
                self.file_baseline(l, r).await?
            }
            _ => BaselineEntry::directory(path),
        };
        Ok(ActionOutcome::new(0, BaselineChange::Save(entry)))
    }

    /// Baseline for a file present on both sides, hashing the local copy
    /// when the record carries no hash yet.
    async fn file_baseline(
        &self,
        local: &LocalEntry,
        remote: &RemoteEntry,
    ) -> Result<BaselineEntry, TransferError> {
        if local.is_directory {
            return Ok(BaselineEntry::directory(local.path.clone()));
        }
        let abs = self.absolute(&local.path);
        let mut local = local.clone();
        if local.content_hash.is_none() {
            local.content_hash = Some(self.fs.hash_file(&abs).await?);
        }
        let mut entry = BaselineEntry::from_entries(&local, remote);
        if self.planner.tracks_blocks(local.size) {
            entry.block_size = self.planner.block_size();
            entry.block_hashes = self.fs.block_hashes(&abs, entry.block_size).await?;
        }
        Ok(entry)
    }

    /// Fails when the local path no longer matches the record the action
    /// was planned against.
    async fn ensure_local_unchanged(&self, queued: &QueuedAction) -> Result<(), TransferError> {
        let current = self.fs.stat(&self.root, queued.path()).await?;
        let unchanged = match (queued.local.as_ref(), current.as_ref()) {
            (None, None) => true,
            (Some(planned), Some(now)) => same_file(planned, now),
            _ => false,
        };
        if unchanged {
            Ok(())
        } else {
            Err(TransferError::ChecksumMismatch {
                path: queued.path().to_string(),
                expected: fingerprint(queued.local.as_ref()),
                actual: fingerprint(current.as_ref()),
            })
        }
    }

    fn mismatch(&self, path: &str, expected: &str, actual: &str) -> TransferError {
        TransferError::ChecksumMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

fn same_file(a: &LocalEntry, b: &LocalEntry) -> bool {
    a.is_directory == b.is_directory
        && (a.is_directory || (a.size == b.size && a.modified == b.modified))
}

fn fingerprint(entry: Option<&LocalEntry>) -> String {
    match entry {
        None => "absent".to_string(),
        Some(e) if e.is_directory => "directory".to_string(),
        Some(e) => format!("{} bytes modified {}", e.size, e.modified.to_rfc3339()),
    }
}

/// Sizes of the transfer actions in a queue, keyed by position
pub fn planned_sizes(queue: &[QueuedAction]) -> HashMap<usize, u64> {
    queue
        .iter()
        .enumerate()
        .map(|(idx, q)| (idx, q.planned_bytes()))
        .collect()
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use oxisync_core::domain::SyncItem;
    use oxisync_core::ports::{NetworkKind, NetworkStatus};
    use tempfile::TempDir;

    use super::*;
    use crate::filesystem::LocalFileSystemAdapter;
    use crate::network::SharedNetworkStatus;
    use crate::test_support::{sha256_hex, MemoryRemote};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        bytes: Mutex<Vec<(usize, u64)>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl TransferObserver for Recorder {
        async fn item_started(&self, _index: usize, queued: &QueuedAction) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {}", queued.path()));
        }
        fn bytes_transferred(&self, index: usize, bytes: u64) {
            self.bytes.lock().unwrap().push((index, bytes));
        }
        async fn item_finished(
            &self,
            _index: usize,
            queued: &QueuedAction,
            result: &Result<ActionOutcome, TransferError>,
        ) {
            let tag = match result {
                Ok(_) => "ok".to_string(),
                Err(e) => format!("err {e}"),
            };
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {} {tag}", queued.path()));
        }
        async fn item_skipped(&self, _index: usize, queued: &QueuedAction) {
            self.events
                .lock()
                .unwrap()
                .push(format!("skip {}", queued.path()));
        }
        async fn paused(&self, reason: SuspendReason) {
            self.events.lock().unwrap().push(format!("paused {reason}"));
        }
        async fn resumed(&self) {
            self.events.lock().unwrap().push("resumed".into());
        }
    }

    struct Fixture {
        dir: TempDir,
        remote: Arc<MemoryRemote>,
        network: Arc<SharedNetworkStatus>,
        config: SyncConfig,
        server: ServerInfo,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = SyncConfig::default();
            config.sync_folder = dir.path().to_path_buf();
            config.transfer.retry_base_delay_ms = 1;
            config.transfer.chunk_size = 4;
            Self {
                dir,
                remote: Arc::new(MemoryRemote::new()),
                network: Arc::new(SharedNetworkStatus::default()),
                config,
                server: ServerInfo::fallback("https://cloud.example.com"),
                cancel: CancellationToken::new(),
            }
        }

        fn scheduler(&self) -> TransferScheduler {
            TransferScheduler::new(
                self.remote.clone(),
                Arc::new(LocalFileSystemAdapter::new()),
                self.network.clone(),
                Throttles::from_config(&self.config),
                Arc::new(self.config.clone()),
                self.server.clone(),
                self.cancel.clone(),
            )
        }

        fn write(&self, rel: &str, data: &[u8]) -> LocalEntry {
            let p = self.dir.path().join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(&p, data).unwrap();
            let meta = std::fs::metadata(&p).unwrap();
            let modified: chrono::DateTime<Utc> = meta.modified().unwrap().into();
            LocalEntry {
                path: rel.into(),
                is_directory: false,
                size: data.len() as u64,
                modified,
                content_hash: Some(sha256_hex(data)),
            }
        }

        fn read(&self, rel: &str) -> Option<Vec<u8>> {
            std::fs::read(self.dir.path().join(rel)).ok()
        }

        async fn remote_entry(&self, rel: &str) -> RemoteEntry {
            self.remote.stat(rel).await.unwrap().unwrap()
        }
    }

    fn queued(kind: ActionKind, local: Option<LocalEntry>, remote: Option<RemoteEntry>) -> QueuedAction {
        let path = local
            .as_ref()
            .map(|l| l.path.clone())
            .or_else(|| remote.as_ref().map(|r| r.path.clone()))
            .unwrap_or_default();
        let direction = kind.direction();
        let item = SyncItem::from_snapshots(&path, local.as_ref(), remote.as_ref(), direction);
        QueuedAction {
            action: SyncAction::new(kind, item),
            group: 0,
            last_in_group: true,
            local,
            remote,
            baseline: None,
        }
    }

    fn staging_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(oxisync_core::ignore::STAGING_SUFFIX)
            })
            .count()
    }

    // ------------------------------------------------------------------
    // Queue grouping
    // ------------------------------------------------------------------

    #[test]
    fn test_group_tracks_state_left_by_earlier_actions() {
        let now = Utc::now();
        let local = LocalEntry {
            path: "doc.txt".into(),
            is_directory: false,
            size: 3,
            modified: now,
            content_hash: Some("h1".into()),
        };
        let candidate = ScanCandidate {
            item: SyncItem::new("doc.txt", false),
            local_change: ChangeKind::Modified,
            remote_change: ChangeKind::Modified,
            moved_from: None,
            local: Some(local.clone()),
            remote: None,
            baseline: None,
        };
        let copy = "doc (conflicted copy).txt";
        let item = SyncItem::new("doc.txt", false);
        let actions = vec![
            SyncAction::new(ActionKind::RenameLocal { to: copy.into() }, item.clone()),
            SyncAction::new(ActionKind::Upload, item.with_path(copy)),
            SyncAction::new(ActionKind::Download, item),
        ];

        let queue = QueuedAction::group(7, &candidate, actions);
        assert_eq!(queue.len(), 3);
        assert!(queue.iter().all(|q| q.group == 7));
        assert_eq!(queue[0].local.as_ref(), Some(&local));
        assert_eq!(queue[1].local.as_ref().unwrap().path, copy);
        assert_eq!(queue[1].local.as_ref().unwrap().content_hash.as_deref(), Some("h1"));
        assert!(queue[2].local.is_none());
        assert!(queue[2].last_in_group);
        assert!(!queue[0].last_in_group);
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_upload_new_file_in_chunks() {
        let fx = Fixture::new();
        let local = fx.write("a.txt", b"hello world");
        let q = queued(ActionKind::Upload, Some(local), None);
        let rec = Recorder::default();

        let report = fx.scheduler().drain(std::slice::from_ref(&q), &rec).await;

        assert_eq!(report.completed, 1);
        assert_eq!(fx.remote.content("a.txt").unwrap(), b"hello world");
        assert_eq!(fx.remote.calls("upload_chunk").len(), 3);
        assert_eq!(rec.bytes.lock().unwrap().last(), Some(&(0, 11)));
        assert_eq!(fx.remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_upload_records_baseline() {
        let fx = Fixture::new();
        let local = fx.write("a.txt", b"abc");
        let q = queued(ActionKind::Upload, Some(local), None);
        let outcome = fx
            .scheduler()
            .execute(0, &q, &Recorder::default())
            .await
            .unwrap();

        let BaselineChange::Save(baseline) = outcome.baseline else {
            panic!("expected a saved baseline");
        };
        assert_eq!(baseline.content_hash.as_deref(), Some(sha256_hex(b"abc").as_str()));
        assert!(baseline.etag.is_some());
        assert_eq!(outcome.bytes, 3);
    }

    #[tokio::test]
    async fn test_upload_rehashes_file_edited_after_scan() {
        let fx = Fixture::new();
        let mut scanned = fx.write("a.txt", b"old content");
        scanned.size = 3;
        fx.write("a.txt", b"new content!");
        let q = queued(ActionKind::Upload, Some(scanned), None);

        let report = fx.scheduler().drain(&[q], &Recorder::default()).await;
        assert_eq!(report.completed, 1);
        assert_eq!(fx.remote.content("a.txt").unwrap(), b"new content!");
    }

    #[tokio::test]
    async fn test_upload_hash_mismatch_aborts_session() {
        let fx = Fixture::new();
        let mut local = fx.write("a.txt", b"abcdef");
        local.content_hash = Some("not-the-hash".into());
        let mut config = fx.config.clone();
        config.transfer.max_retries = 0;
        let scheduler = TransferScheduler::new(
            fx.remote.clone(),
            Arc::new(LocalFileSystemAdapter::new()),
            fx.network.clone(),
            Throttles::from_config(&config),
            Arc::new(config),
            fx.server.clone(),
            fx.cancel.clone(),
        );
        let q = queued(ActionKind::Upload, Some(local), None);

        let result = scheduler.execute(0, &q, &Recorder::default()).await;
        assert!(matches!(result, Err(TransferError::ChecksumMismatch { .. })));
        assert!(!fx.remote.exists("a.txt"));
        assert_eq!(fx.remote.calls("abort_upload").len(), 1);
        assert_eq!(fx.remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_throttled_upload_stops_promptly_on_cancel() {
        let fx = Fixture::new();
        let local = fx.write("big.bin", &[1u8; 64 * 1024]);
        let mut config = fx.config.clone();
        config.max_upload_speed_kbps = 1;
        config.transfer.chunk_size = 4 * 1024 * 1024;
        let scheduler = TransferScheduler::new(
            fx.remote.clone(),
            Arc::new(LocalFileSystemAdapter::new()),
            fx.network.clone(),
            Throttles::from_config(&config),
            Arc::new(config),
            fx.server.clone(),
            fx.cancel.clone(),
        );
        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        let q = queued(ActionKind::Upload, Some(local), None);
        let started = std::time::Instant::now();
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.drain(&[q], &Recorder::default()),
        )
        .await
        .expect("throttled upload ignored cancellation");

        assert!(report.cancelled);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        // One second of tokens per chunk: only the initial burst went out
        assert_eq!(fx.remote.calls("upload_chunk").len(), 1);
        assert!(!fx.remote.exists("big.bin"));
        assert_eq!(fx.remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_upload_uses_if_match_of_scanned_remote() {
        let fx = Fixture::new();
        fx.remote.put_file("a.txt", b"v1");
        let mut stale = fx.remote_entry("a.txt").await;
        stale.etag = Some("\"stale\"".into());
        let local = fx.write("a.txt", b"v2");
        let q = queued(ActionKind::Upload, Some(local), Some(stale));

        let rec = Recorder::default();
        let report = fx.scheduler().drain(&[q], &rec).await;
        assert_eq!(report.failed, 1);
        assert_eq!(fx.remote.content("a.txt").unwrap(), b"v1");
        assert!(rec.events()[1].contains("Precondition failed"));
    }

    #[tokio::test]
    async fn test_delta_upload_sends_changed_blocks_only() {
        let mut fx = Fixture::new();
        fx.config.delta_sync_min_size = 8;
        fx.config.transfer.delta_block_size = 4;
        fx.server.supports_delta_sync = true;

        let etag = fx.remote.put_file("f.bin", b"aaaabbbbcccc");
        let old = fx.write("f.bin", b"aaaabbbbcccc");
        let remote = fx.remote_entry("f.bin").await;
        let baseline = BaselineEntry {
            block_size: 4,
            block_hashes: vec![sha256_hex(b"aaaa"), sha256_hex(b"bbbb"), sha256_hex(b"cccc")],
            ..BaselineEntry::from_entries(&old, &remote)
        };
        assert_eq!(baseline.etag.as_deref(), Some(etag.as_str()));

        let local = fx.write("f.bin", b"aaaaXXXXcccc");
        let mut q = queued(ActionKind::Upload, Some(local), Some(remote));
        q.baseline = Some(baseline);

        let report = fx.scheduler().drain(&[q], &Recorder::default()).await;
        assert_eq!(report.completed, 1);
        assert_eq!(fx.remote.content("f.bin").unwrap(), b"aaaaXXXXcccc");
        assert_eq!(fx.remote.calls("begin_upload"), vec!["begin_upload f.bin Delta 12"]);
        assert_eq!(fx.remote.calls("upload_chunk"), vec!["upload_chunk f.bin 4 4"]);
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_download_commits_verified_file() {
        let fx = Fixture::new();
        fx.remote.put_file("docs/b.txt", b"remote data");
        let remote = fx.remote_entry("docs/b.txt").await;
        let q = queued(ActionKind::Download, None, Some(remote));

        let report = fx.scheduler().drain(&[q], &Recorder::default()).await;
        assert_eq!(report.completed, 1);
        assert_eq!(fx.read("docs/b.txt").unwrap(), b"remote data");
        assert_eq!(staging_files(&fx.dir.path().join("docs")), 0);
    }

    #[tokio::test]
    async fn test_download_retries_transient_errors() {
        let fx = Fixture::new();
        fx.remote.put_file("b.txt", b"data");
        fx.remote
            .fail("download_range", RemoteError::Timeout("30s".into()), 2);
        let remote = fx.remote_entry("b.txt").await;
        let q = queued(ActionKind::Download, None, Some(remote));

        let report = fx.scheduler().drain(&[q], &Recorder::default()).await;
        assert_eq!(report.completed, 1);
        assert_eq!(fx.read("b.txt").unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_download_failure_leaves_destination_untouched() {
        let fx = Fixture::new();
        fx.remote.put_file("b.txt", b"new remote data");
        let local = fx.write("b.txt", b"old local");
        fx.remote.fail("download_range", RemoteError::QuotaExceeded, 1);
        let remote = fx.remote_entry("b.txt").await;
        let q = queued(ActionKind::Download, Some(local), Some(remote));

        let report = fx.scheduler().drain(&[q], &Recorder::default()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(fx.read("b.txt").unwrap(), b"old local");
        assert_eq!(staging_files(fx.dir.path()), 0);
    }

    #[tokio::test]
    async fn test_download_refuses_to_overwrite_local_edit() {
        let mut fx = Fixture::new();
        fx.config.transfer.max_retries = 1;
        fx.remote.put_file("b.txt", b"remote");
        let mut scanned = fx.write("b.txt", b"local");
        scanned.size = 1;
        let remote = fx.remote_entry("b.txt").await;
        let q = queued(ActionKind::Download, Some(scanned), Some(remote));

        let result = fx.scheduler().execute_with_retry(0, &q, &Recorder::default()).await;
        assert!(matches!(result, Err(TransferError::ChecksumMismatch { .. })));
        assert_eq!(fx.read("b.txt").unwrap(), b"local");
        assert_eq!(q.to_conflict().conflict_type, ConflictType::BothModified);
    }

    #[tokio::test]
    async fn test_cancel_mid_download_discards_staging() {
        let fx = Fixture::new();
        fx.remote.put_file("big.bin", &[7u8; 64]);
        let remote = fx.remote_entry("big.bin").await;
        let q = queued(ActionKind::Download, None, Some(remote));

        struct CancelAfterFirstChunk(CancellationToken);
        #[async_trait::async_trait]
        impl TransferObserver for CancelAfterFirstChunk {
            async fn item_started(&self, _: usize, _: &QueuedAction) {}
            fn bytes_transferred(&self, _: usize, _: u64) {
                self.0.cancel();
            }
            async fn item_finished(
                &self,
                _: usize,
                _: &QueuedAction,
                _: &Result<ActionOutcome, TransferError>,
            ) {
            }
            async fn item_skipped(&self, _: usize, _: &QueuedAction) {}
            async fn paused(&self, _: SuspendReason) {}
            async fn resumed(&self) {}
        }

        let report = fx
            .scheduler()
            .drain(&[q], &CancelAfterFirstChunk(fx.cancel.clone()))
            .await;
        assert!(report.cancelled);
        assert!(fx.read("big.bin").is_none());
        assert_eq!(staging_files(fx.dir.path()), 0);
    }

    // ------------------------------------------------------------------
    // Other actions
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_delete_local_keeps_non_empty_directory() {
        let fx = Fixture::new();
        fx.write("d/keep.txt", b"x");
        let dir_entry = LocalEntry {
            path: "d".into(),
            is_directory: true,
            size: 0,
            modified: Utc::now(),
            content_hash: None,
        };
        let q = queued(ActionKind::DeleteLocal, Some(dir_entry), None);

        let outcome = fx
            .scheduler()
            .execute(0, &q, &Recorder::default())
            .await
            .unwrap();
        assert_eq!(outcome.baseline, BaselineChange::Remove);
        assert!(fx.dir.path().join("d/keep.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_action_skips_rest_of_group() {
        let fx = Fixture::new();
        fx.remote.put_file("x.txt", b"remote");
        let remote = fx.remote_entry("x.txt").await;
        let mut rename = queued(
            ActionKind::RenameLocal {
                to: "x (copy).txt".into(),
            },
            Some(LocalEntry {
                path: "x.txt".into(),
                is_directory: false,
                size: 1,
                modified: Utc::now(),
                content_hash: None,
            }),
            None,
        );
        rename.last_in_group = false;
        let download = queued(ActionKind::Download, None, Some(remote));

        let rec = Recorder::default();
        let report = fx.scheduler().drain(&[rename, download], &rec).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(rec.events().last().unwrap(), "skip x.txt");
        assert!(fx.read("x.txt").is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_drain() {
        let fx = Fixture::new();
        fx.remote.fail("create_directory", RemoteError::Unauthorized, 1);
        let dir = |p: &str| {
            let mut q = queued(ActionKind::CreateRemoteDir, None, None);
            q.action.item = SyncItem::new(p, true);
            q.group = p.len();
            q
        };

        let report = fx
            .scheduler()
            .drain(&[dir("a"), dir("bb")], &Recorder::default())
            .await;
        assert!(report.aborted.as_ref().is_some_and(|e| e.is_auth_failure()));
        assert!(!fx.remote.exists("bb"));
    }

    #[tokio::test]
    async fn test_move_remote_replaces_baseline() {
        let fx = Fixture::new();
        fx.remote.put_file("old.txt", b"same");
        let local = fx.write("new.txt", b"same");
        let q = queued(
            ActionKind::MoveRemote {
                from: "old.txt".into(),
            },
            Some(local),
            None,
        );

        let outcome = fx
            .scheduler()
            .execute(0, &q, &Recorder::default())
            .await
            .unwrap();
        assert!(fx.remote.exists("new.txt"));
        assert!(!fx.remote.exists("old.txt"));
        match outcome.baseline {
            BaselineChange::Replace { from, entry } => {
                assert_eq!(from, "old.txt");
                assert_eq!(entry.path, "new.txt");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Network policy
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_allowed_network() {
        let fx = Fixture::new();
        fx.network
            .set(NetworkStatus::new(NetworkKind::Wifi, true));
        let network = fx.network.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            network.set(NetworkStatus::new(NetworkKind::Wifi, false));
        });

        let mut q = queued(ActionKind::CreateRemoteDir, None, None);
        q.action.item = SyncItem::new("d", true);
        let rec = Recorder::default();
        let report = fx.scheduler().drain(&[q], &rec).await;

        assert_eq!(report.completed, 1);
        let events = rec.events();
        assert_eq!(events[0], "paused metered network");
        assert_eq!(events[1], "resumed");
        assert!(fx.remote.exists("d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_suspended() {
        let fx = Fixture::new();
        fx.network.set(NetworkStatus::new(NetworkKind::Offline, false));
        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        });

        let mut q = queued(ActionKind::CreateRemoteDir, None, None);
        q.action.item = SyncItem::new("d", true);
        let report = fx.scheduler().drain(&[q], &Recorder::default()).await;
        assert!(report.cancelled);
        assert!(!fx.remote.exists("d"));
    }
}
