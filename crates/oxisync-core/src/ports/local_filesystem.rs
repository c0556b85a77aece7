//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for reading and writing the local
//! mirror: scanning, hashing, and the staged write path used by downloads.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - Downloads never write the destination directly. They write a
//!   [`StagedFile`] next to it and publish it with a single rename in
//!   [`ILocalFileSystem::commit_staged`]; a crash or cancel leaves at most a
//!   staging file, which the scanner ignores.
//! - Scan results carry relative `/`-separated paths; every other method
//!   takes absolute paths.

use std::path::{Path, PathBuf};

use crate::domain::LocalEntry;

/// A staging file waiting to replace its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub staging_path: PathBuf,
    pub destination: PathBuf,
}

/// Local mirror operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Lists every file and directory below `root` (symlinks skipped).
    ///
    /// Content hashes are left empty; callers hash only what they need.
    async fn scan(&self, root: &Path) -> anyhow::Result<Vec<LocalEntry>>;

    /// Metadata of one entry below `root`, `None` when it does not exist.
    async fn stat(&self, root: &Path, relative: &str) -> anyhow::Result<Option<LocalEntry>>;

    /// Hex SHA-256 of the whole file.
    async fn hash_file(&self, path: &Path) -> anyhow::Result<String>;

    /// Hex SHA-256 of each `block_size` block, in order.
    async fn block_hashes(&self, path: &Path, block_size: u64) -> anyhow::Result<Vec<String>>;

    /// Reads up to `length` bytes at `offset`.
    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> anyhow::Result<Vec<u8>>;

    /// Creates a staging file for `destination`, optionally seeded with the
    /// destination's current content.
    async fn begin_staging(&self, destination: &Path, seed: bool) -> anyhow::Result<StagedFile>;

    /// Writes `data` at `offset` in the staging file.
    async fn write_staged(&self, staged: &StagedFile, offset: u64, data: &[u8])
        -> anyhow::Result<()>;

    /// Hex SHA-256 of the staging file truncated to `len`.
    async fn finish_staged(&self, staged: &StagedFile, len: u64) -> anyhow::Result<String>;

    /// Atomically replaces the destination with the staging file.
    async fn commit_staged(&self, staged: &StagedFile) -> anyhow::Result<()>;

    /// Removes the staging file; a missing file is not an error.
    async fn discard_staged(&self, staged: &StagedFile) -> anyhow::Result<()>;

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()>;

    /// Removes a file, or a directory only when it is empty.
    ///
    /// Returns `false` when a non-empty directory was left in place.
    /// A missing path counts as removed.
    async fn remove(&self, path: &Path) -> anyhow::Result<bool>;

    /// Renames `from` to `to`, creating `to`'s parent when needed.
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

    async fn exists(&self, path: &Path) -> bool;
}
