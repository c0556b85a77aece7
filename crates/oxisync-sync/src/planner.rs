//! Delta transfer planning
//!
//! A transfer moves either the whole file or only the blocks that changed
//! since the baseline. Blocks are fixed-size (`transfer.delta_block_size`)
//! and identified by their SHA-256.
//!
//! Delta applies only when every precondition holds:
//! - delta sync is enabled and the file is at least `delta_sync_min_size`
//! - the server supports delta sync
//! - the baseline carries block hashes computed with the current block size
//! - uploads: the remote is unchanged since the baseline, the server accepts
//!   chunked uploads, and the file did not shrink
//! - downloads: the local copy is unchanged since the baseline and the
//!   remote block signature is available

use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{BaselineEntry, LocalEntry, RemoteEntry, ServerInfo, SyncDirection};
use oxisync_core::ports::RemoteSignature;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A contiguous byte span of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Full,
    Delta,
}

/// What a single transfer will move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub path: String,
    pub direction: SyncDirection,
    pub mode: TransferMode,
    /// Ranges to move, ascending and non-overlapping
    pub ranges: Vec<ByteRange>,
    /// Size of the file once the transfer completes
    pub total_bytes: u64,
    /// Sum of the range lengths
    pub transfer_bytes: u64,
    /// Hex SHA-256 the result must have, when known
    pub expected_hash: Option<String>,
}

/// Inputs of a single plan
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub server: &'a ServerInfo,
    pub baseline: Option<&'a BaselineEntry>,
    pub local: Option<&'a LocalEntry>,
    pub remote: Option<&'a RemoteEntry>,
    /// Current block hashes of the local file (uploads)
    pub local_blocks: Option<&'a [String]>,
    /// Current block signature of the remote file (downloads)
    pub remote_signature: Option<&'a RemoteSignature>,
}

/// Chooses between full and delta transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaPlanner {
    enabled: bool,
    min_size: u64,
    block_size: u64,
}

impl DeltaPlanner {
    pub fn new(enabled: bool, min_size: u64, block_size: u64) -> Self {
        Self {
            enabled,
            min_size,
            block_size,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.delta_sync_enabled,
            config.delta_sync_min_size,
            config.transfer.delta_block_size,
        )
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Whether a file of `size` should carry block hashes in its baseline
    pub fn tracks_blocks(&self, size: u64) -> bool {
        self.enabled && self.block_size > 0 && size >= self.min_size
    }

    /// Whether every precondition except the block lists holds.
    ///
    /// Callers use this to decide whether computing local block hashes or
    /// fetching the remote signature is worth it.
    pub fn delta_candidate(&self, direction: SyncDirection, ctx: &PlanContext<'_>) -> bool {
        let Some(baseline) = ctx.baseline else {
            return false;
        };
        if !ctx.server.supports_delta_sync
            || !baseline.has_block_signature()
            || baseline.block_size != self.block_size
        {
            return false;
        }

        match direction {
            SyncDirection::Upload => {
                let (Some(local), Some(remote)) = (ctx.local, ctx.remote) else {
                    return false;
                };
                self.tracks_blocks(local.size)
                    && ctx.server.supports_chunked_upload
                    && local.size >= baseline.size
                    && remote.etag.is_some()
                    && remote.etag == baseline.etag
            }
            SyncDirection::Download => {
                let (Some(local), Some(remote)) = (ctx.local, ctx.remote) else {
                    return false;
                };
                self.tracks_blocks(remote.size)
                    && local.content_hash.is_some()
                    && local.content_hash == baseline.content_hash
            }
            SyncDirection::None => false,
        }
    }

    /// Plans one transfer.
    pub fn plan(&self, path: &str, direction: SyncDirection, ctx: &PlanContext<'_>) -> TransferPlan {
        let (total, expected_hash) = match direction {
            SyncDirection::Upload => ctx
                .local
                .map(|l| (l.size, l.content_hash.clone()))
                .unwrap_or((0, None)),
            _ => ctx
                .remote
                .map(|r| (r.size, r.content_hash.clone()))
                .unwrap_or((0, None)),
        };

        let delta = if self.delta_candidate(direction, ctx) {
            self.changed_ranges(direction, total, ctx)
        } else {
            None
        };

        let (mode, ranges) = match delta {
            Some(ranges) => (TransferMode::Delta, ranges),
            None => (
                TransferMode::Full,
                vec![ByteRange {
                    offset: 0,
                    length: total,
                }],
            ),
        };
        let transfer_bytes = ranges.iter().map(|r| r.length).sum();

        debug!(
            path = %path,
            direction = %direction,
            mode = ?mode,
            total_bytes = total,
            transfer_bytes,
            "Transfer planned"
        );

        TransferPlan {
            path: path.to_string(),
            direction,
            mode,
            ranges,
            total_bytes: total,
            transfer_bytes,
            expected_hash,
        }
    }

    /// Block ranges whose hash differs from the baseline, or `None` when the
    /// current block list is missing or was computed with another block size.
    fn changed_ranges(
        &self,
        direction: SyncDirection,
        total: u64,
        ctx: &PlanContext<'_>,
    ) -> Option<Vec<ByteRange>> {
        let baseline = ctx.baseline?;
        let current: &[String] = match direction {
            SyncDirection::Upload => ctx.local_blocks?,
            _ => {
                let sig = ctx.remote_signature?;
                if sig.block_size != self.block_size || sig.size != total {
                    return None;
                }
                &sig.blocks
            }
        };

        let mut ranges: Vec<ByteRange> = Vec::new();
        for (idx, hash) in current.iter().enumerate() {
            if baseline.block_hashes.get(idx) == Some(hash) {
                continue;
            }
            let offset = idx as u64 * self.block_size;
            if offset >= total {
                break;
            }
            let length = self.block_size.min(total - offset);
            match ranges.last_mut() {
                Some(last) if last.end() == offset => last.length += length,
                _ => ranges.push(ByteRange { offset, length }),
            }
        }
        Some(ranges)
    }
}
