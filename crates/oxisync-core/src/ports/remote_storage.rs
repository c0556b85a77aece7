//! Remote storage port (driven/secondary port)
//!
//! This module defines the interface for the remote file tree. The primary
//! implementation speaks WebDAV to an OxiCloud server.
//!
//! ## Design Notes
//!
//! - Returns [`RemoteError`] so the transfer scheduler can tell transient
//!   failures (retry) from permanent ones (fail the item) and from
//!   authentication failures (abort the pass).
//! - Uploads go through a session: nothing is visible on the server until
//!   [`IRemoteStorage::commit_upload`] succeeds, and
//!   [`IRemoteStorage::abort_upload`] discards everything sent so far.
//! - All paths are relative to the user's root and `/`-separated.

use serde::{Deserialize, Serialize};

use crate::domain::{AuthSession, RemoteEntry, RemoteError};

/// How an upload session writes its content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// The chunks cover the whole file and replace it
    Full,
    /// The chunks patch ranges of the existing remote file
    Delta,
}

/// Handle of an in-flight upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: String,
    pub path: String,
    pub mode: UploadMode,
    /// Final size of the file after commit
    pub total_size: u64,
    /// ETag the remote file must still carry at commit time
    pub if_match: Option<String>,
}

/// Block signature of a remote file, used for delta downloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSignature {
    pub size: u64,
    pub block_size: u64,
    /// Hex SHA-256 per block, in order
    pub blocks: Vec<String>,
}

/// Remote file tree operations
#[async_trait::async_trait]
pub trait IRemoteStorage: Send + Sync {
    /// Points the adapter at the user's tree with the session's token.
    async fn configure(&self, session: &AuthSession) -> Result<(), RemoteError>;

    /// Forgets the configured session; later calls fail with `NotConfigured`.
    async fn clear(&self);

    /// Immediate children of `path` (`""` for the root).
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Every entry below the root, parents before children.
    async fn list_tree(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut out = Vec::new();
        let mut pending = vec![String::new()];
        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                if entry.is_directory {
                    pending.push(entry.path.clone());
                }
                out.push(entry);
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Metadata of a single entry, `None` when it does not exist.
    async fn stat(&self, path: &str) -> Result<Option<RemoteEntry>, RemoteError>;

    /// Reads `length` bytes starting at `offset`.
    async fn download_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, RemoteError>;

    /// Block hashes of the remote file (servers with delta support only).
    async fn signature(&self, path: &str, block_size: u64) -> Result<RemoteSignature, RemoteError>;

    async fn begin_upload(
        &self,
        path: &str,
        mode: UploadMode,
        total_size: u64,
        if_match: Option<&str>,
    ) -> Result<UploadSession, RemoteError>;

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<(), RemoteError>;

    /// Materializes the uploaded content and returns the new remote entry.
    async fn commit_upload(&self, session: &UploadSession) -> Result<RemoteEntry, RemoteError>;

    async fn abort_upload(&self, session: &UploadSession) -> Result<(), RemoteError>;

    async fn create_directory(&self, path: &str) -> Result<(), RemoteError>;

    /// Deletes a file or directory; a missing target is not an error.
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    /// Server-side move without overwriting an existing destination.
    async fn move_item(&self, from: &str, to: &str) -> Result<(), RemoteError>;
}
