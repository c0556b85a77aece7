//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Staged writes**: downloads go to a hidden `.<name>.<uuid>.oxisync-partial`
//!   file in the destination directory and are published with a rename, so
//!   the destination is never partially written.
//! - **SHA-256**: content and block hashes are lowercase hex SHA-256, streamed
//!   in fixed-size reads.
//! - **Symlinks** are neither followed nor reported.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use oxisync_core::domain::{path as relpath, LocalEntry};
use oxisync_core::ignore::STAGING_SUFFIX;
use oxisync_core::ports::{ILocalFileSystem, StagedFile};
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

/// Read size used when hashing whole files
const HASH_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// LocalFileSystemAdapter struct
// ============================================================================

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// This is a zero-sized struct because all operations derive their context
/// from the path arguments. The sync root lives in the configuration.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn to_utc(time: std::io::Result<SystemTime>) -> DateTime<Utc> {
    time.ok()
        .and_then(|st| st.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
        .unwrap_or_default()
}

fn entry_from_metadata(relative: String, metadata: &std::fs::Metadata) -> LocalEntry {
    let is_directory = metadata.is_dir();
    LocalEntry {
        path: relative,
        is_directory,
        size: if is_directory { 0 } else { metadata.len() },
        modified: to_utc(metadata.modified()),
        content_hash: None,
    }
}

/// Fills `buf` from `reader`, returning fewer bytes only at end of file.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn staging_path_for(destination: &Path) -> anyhow::Result<PathBuf> {
    let parent = destination
        .parent()
        .with_context(|| format!("no parent directory: {}", destination.display()))?;
    let name = destination
        .file_name()
        .with_context(|| format!("no file name: {}", destination.display()))?
        .to_string_lossy();
    let tag = uuid::Uuid::new_v4().simple();
    Ok(parent.join(format!(".{name}.{tag}{STAGING_SUFFIX}")))
}

// ============================================================================
// ILocalFileSystem implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(root = %root.display()))]
    async fn scan(&self, root: &Path) -> anyhow::Result<Vec<LocalEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read directory {}", dir.display()))?;

            while let Some(entry) = reader.next_entry().await? {
                let abs = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_symlink() {
                    debug!(path = %abs.display(), "Skipping symlink");
                    continue;
                }
                let Some(relative) = relpath::to_relative(root, &abs) else {
                    warn!(path = %abs.display(), "Skipping path that is not valid UTF-8");
                    continue;
                };
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(abs);
                }
                entries.push(entry_from_metadata(relative, &metadata));
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(entries = entries.len(), "local scan complete");
        Ok(entries)
    }

    #[instrument(skip(self, root))]
    async fn stat(&self, root: &Path, relative: &str) -> anyhow::Result<Option<LocalEntry>> {
        let abs = relpath::to_absolute(root, relative);
        match tokio::fs::symlink_metadata(&abs).await {
            Ok(m) if m.file_type().is_symlink() => Ok(None),
            Ok(m) => Ok(Some(entry_from_metadata(relative.to_string(), &m))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {}", abs.display())),
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn hash_file(&self, path: &Path) -> anyhow::Result<String> {
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let hash = format!("{:x}", hasher.finalize());
        debug!(hash = %hash, "hash computed");
        Ok(hash)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn block_hashes(&self, path: &Path, block_size: u64) -> anyhow::Result<Vec<String>> {
        anyhow::ensure!(block_size > 0, "block size must be greater than 0");
        let block_len = usize::try_from(block_size).context("block size too large")?;
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut buf = vec![0u8; block_len];
        let mut blocks = Vec::new();
        loop {
            let n = read_full(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            blocks.push(format!("{:x}", Sha256::digest(&buf[..n])));
            if n < block_len {
                break;
            }
        }
        Ok(blocks)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> anyhow::Result<Vec<u8>> {
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut data = Vec::new();
        file.take(length).read_to_end(&mut data).await?;
        Ok(data)
    }

    #[instrument(skip(self), fields(destination = %destination.display()))]
    async fn begin_staging(&self, destination: &Path, seed: bool) -> anyhow::Result<StagedFile> {
        let staging_path = staging_path_for(destination)?;
        if let Some(parent) = staging_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let seeded = seed
            && tokio::fs::metadata(destination)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
        if seeded {
            tokio::fs::copy(destination, &staging_path)
                .await
                .with_context(|| format!("Failed to seed {}", staging_path.display()))?;
        } else {
            File::create(&staging_path)
                .await
                .with_context(|| format!("Failed to create {}", staging_path.display()))?;
        }

        debug!(staging = %staging_path.display(), seeded, "staging file created");
        Ok(StagedFile {
            staging_path,
            destination: destination.to_path_buf(),
        })
    }

    #[instrument(skip(self, staged, data), fields(staging = %staged.staging_path.display(), bytes = data.len()))]
    async fn write_staged(
        &self,
        staged: &StagedFile,
        offset: u64,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&staged.staging_path)
            .await
            .with_context(|| format!("Failed to open {}", staged.staging_path.display()))?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    #[instrument(skip(self, staged), fields(staging = %staged.staging_path.display()))]
    async fn finish_staged(&self, staged: &StagedFile, len: u64) -> anyhow::Result<String> {
        {
            let file = OpenOptions::new()
                .write(true)
                .open(&staged.staging_path)
                .await?;
            file.set_len(len).await?;
            file.sync_all().await?;
        }
        self.hash_file(&staged.staging_path).await
    }

    #[instrument(skip(self, staged), fields(destination = %staged.destination.display()))]
    async fn commit_staged(&self, staged: &StagedFile) -> anyhow::Result<()> {
        tokio::fs::rename(&staged.staging_path, &staged.destination)
            .await
            .with_context(|| {
                format!(
                    "Failed to move {} into place",
                    staged.staging_path.display()
                )
            })?;
        debug!("staged file committed");
        Ok(())
    }

    #[instrument(skip(self, staged), fields(staging = %staged.staging_path.display()))]
    async fn discard_staged(&self, staged: &StagedFile) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&staged.staging_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory {}", path.display()))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove(&self, path: &Path) -> anyhow::Result<bool> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            let mut reader = tokio::fs::read_dir(path).await?;
            if reader.next_entry().await?.is_some() {
                debug!("directory not empty, leaving it in place");
                return Ok(false);
            }
            tokio::fs::remove_dir(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        debug!("removed");
        Ok(true)
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to)
            .await
            .with_context(|| format!("Failed to rename {}", from.display()))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

// ============================================================================
// Unit tests
// ============================================================================
