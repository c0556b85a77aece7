//! In-memory collaborators shared by the unit tests of this crate

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{
    path, AuthCredentials, AuthError, AuthSession, BaselineEntry, RemoteEntry, RemoteError,
    ServerInfo, SyncConflict, SyncHistoryEntry,
};
use oxisync_core::ports::{
    IAuthProvider, IRemoteStorage, IStateStore, RemoteSignature, UploadMode, UploadSession,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::engine::SyncEngine;
use crate::filesystem::LocalFileSystemAdapter;
use crate::gateway::AuthGateway;
use crate::network::SharedNetworkStatus;
use crate::state::SyncStateMachine;

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

// ============================================================================
// MemoryRemote
// ============================================================================

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    is_dir: bool,
    etag: String,
    modified: DateTime<Utc>,
}

/// Remote tree held in memory, with failure injection per operation
#[derive(Default)]
pub struct MemoryRemote {
    nodes: Mutex<BTreeMap<String, Node>>,
    sessions: Mutex<HashMap<String, (UploadSession, Vec<u8>)>>,
    failures: Mutex<HashMap<&'static str, VecDeque<RemoteError>>>,
    calls: Mutex<Vec<String>>,
    etags: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        format!("\"e{}\"", self.etags.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn put_file(&self, path: &str, data: &[u8]) -> String {
        let etag = self.next_etag();
        self.nodes.lock().unwrap().insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                is_dir: false,
                etag: etag.clone(),
                modified: Utc::now(),
            },
        );
        etag
    }

    pub fn put_dir(&self, path: &str) {
        let etag = self.next_etag();
        self.nodes.lock().unwrap().insert(
            path.to_string(),
            Node {
                data: Vec::new(),
                is_dir: true,
                etag,
                modified: Utc::now(),
            },
        );
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes
            .lock()
            .unwrap()
            .get(path)
            .filter(|n| !n.is_dir)
            .map(|n| n.data.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(path)
    }

    /// Makes the next `count` calls of `op` fail with `err`.
    pub fn fail(&self, op: &'static str, err: RemoteError, count: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(op).or_default();
        for _ in 0..count {
            queue.push_back(err.clone());
        }
    }

    /// Recorded calls whose description starts with `prefix`
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn enter(&self, op: &'static str, detail: String) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(format!("{op} {detail}"));
        match self.failures.lock().unwrap().get_mut(op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn entry(path: &str, node: &Node) -> RemoteEntry {
        RemoteEntry {
            path: path.to_string(),
            is_directory: node.is_dir,
            size: node.data.len() as u64,
            modified: node.modified,
            content_hash: (!node.is_dir).then(|| sha256_hex(&node.data)),
            etag: Some(node.etag.clone()),
            mime_type: None,
        }
    }

    fn parent_exists(nodes: &BTreeMap<String, Node>, p: &str) -> bool {
        match path::parent(p) {
            Some(parent) if !parent.is_empty() => nodes.get(parent).is_some_and(|n| n.is_dir),
            _ => true,
        }
    }
}

#[async_trait::async_trait]
impl IRemoteStorage for MemoryRemote {
    async fn configure(&self, _session: &AuthSession) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn clear(&self) {}

    async fn list_directory(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.enter("list_directory", dir.to_string())?;
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .iter()
            .filter(|(p, _)| path::parent(p).unwrap_or("") == dir)
            .map(|(p, n)| Self::entry(p, n))
            .collect())
    }

    async fn stat(&self, p: &str) -> Result<Option<RemoteEntry>, RemoteError> {
        self.enter("stat", p.to_string())?;
        Ok(self.nodes.lock().unwrap().get(p).map(|n| Self::entry(p, n)))
    }

    async fn download_range(
        &self,
        p: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        self.enter("download_range", format!("{p} {offset} {length}"))?;
        let nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get(p)
            .ok_or_else(|| RemoteError::NotFound(p.to_string()))?;
        let start = (offset as usize).min(node.data.len());
        let end = (start + length as usize).min(node.data.len());
        Ok(node.data[start..end].to_vec())
    }

    async fn signature(&self, p: &str, block_size: u64) -> Result<RemoteSignature, RemoteError> {
        self.enter("signature", p.to_string())?;
        let nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get(p)
            .ok_or_else(|| RemoteError::NotFound(p.to_string()))?;
        Ok(RemoteSignature {
            size: node.data.len() as u64,
            block_size,
            blocks: node
                .data
                .chunks(block_size as usize)
                .map(sha256_hex)
                .collect(),
        })
    }

    async fn begin_upload(
        &self,
        p: &str,
        mode: UploadMode,
        total_size: u64,
        if_match: Option<&str>,
    ) -> Result<UploadSession, RemoteError> {
        self.enter("begin_upload", format!("{p} {mode:?} {total_size}"))?;
        let nodes = self.nodes.lock().unwrap();
        let current = nodes.get(p);
        if let Some(expected) = if_match {
            if current.map(|n| n.etag.as_str()) != Some(expected) {
                return Err(RemoteError::PreconditionFailed(p.to_string()));
            }
        }
        let mut buffer = match (mode, current) {
            (UploadMode::Delta, Some(node)) => node.data.clone(),
            (UploadMode::Delta, None) => return Err(RemoteError::NotFound(p.to_string())),
            (UploadMode::Full, _) => Vec::new(),
        };
        buffer.resize(total_size as usize, 0);
        let session = UploadSession {
            id: uuid::Uuid::new_v4().to_string(),
            path: p.to_string(),
            mode,
            total_size,
            if_match: if_match.map(str::to_string),
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), (session.clone(), buffer));
        Ok(session)
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<(), RemoteError> {
        self.enter(
            "upload_chunk",
            format!("{} {offset} {}", session.path, data.len()),
        )?;
        let mut sessions = self.sessions.lock().unwrap();
        let (_, buffer) = sessions
            .get_mut(&session.id)
            .ok_or_else(|| RemoteError::NotFound(session.id.clone()))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buffer.len() {
            return Err(RemoteError::Protocol("chunk beyond declared size".into()));
        }
        buffer[start..end].copy_from_slice(&data);
        Ok(())
    }

    async fn commit_upload(&self, session: &UploadSession) -> Result<RemoteEntry, RemoteError> {
        self.enter("commit_upload", session.path.clone())?;
        let (_, buffer) = self
            .sessions
            .lock()
            .unwrap()
            .remove(&session.id)
            .ok_or_else(|| RemoteError::NotFound(session.id.clone()))?;
        let etag = self.next_etag();
        let mut nodes = self.nodes.lock().unwrap();
        if !Self::parent_exists(&nodes, &session.path) {
            return Err(RemoteError::Server {
                status: 409,
                message: "parent missing".into(),
            });
        }
        let node = Node {
            data: buffer,
            is_dir: false,
            etag,
            modified: Utc::now(),
        };
        let entry = Self::entry(&session.path, &node);
        nodes.insert(session.path.clone(), node);
        Ok(entry)
    }

    async fn abort_upload(&self, session: &UploadSession) -> Result<(), RemoteError> {
        self.enter("abort_upload", session.path.clone())?;
        self.sessions.lock().unwrap().remove(&session.id);
        Ok(())
    }

    async fn create_directory(&self, p: &str) -> Result<(), RemoteError> {
        self.enter("create_directory", p.to_string())?;
        if !self.exists(p) {
            self.put_dir(p);
        }
        Ok(())
    }

    async fn delete(&self, p: &str) -> Result<(), RemoteError> {
        self.enter("delete", p.to_string())?;
        self.nodes
            .lock()
            .unwrap()
            .retain(|k, _| !path::is_within(k, p));
        Ok(())
    }

    async fn move_item(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.enter("move_item", format!("{from} {to}"))?;
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(to) {
            return Err(RemoteError::PreconditionFailed(to.to_string()));
        }
        let node = nodes
            .remove(from)
            .ok_or_else(|| RemoteError::NotFound(from.to_string()))?;
        nodes.insert(to.to_string(), node);
        Ok(())
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// State store held in memory
#[derive(Default)]
pub struct MemoryStore {
    config: Mutex<Option<SyncConfig>>,
    session: Mutex<Option<AuthSession>>,
    baselines: Mutex<BTreeMap<String, BaselineEntry>>,
    conflicts: Mutex<Vec<SyncConflict>>,
    history: Mutex<Vec<SyncHistoryEntry>>,
    folders: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn baseline(&self, p: &str) -> Option<BaselineEntry> {
        self.baselines.lock().unwrap().get(p).cloned()
    }
}

#[async_trait::async_trait]
impl IStateStore for MemoryStore {
    async fn load_config(&self) -> anyhow::Result<Option<SyncConfig>> {
        Ok(self.config.lock().unwrap().clone())
    }
    async fn save_config(&self, config: &SyncConfig) -> anyhow::Result<()> {
        *self.config.lock().unwrap() = Some(config.clone());
        Ok(())
    }
    async fn load_session(&self) -> anyhow::Result<Option<AuthSession>> {
        Ok(self.session.lock().unwrap().clone())
    }
    async fn save_session(&self, session: &AuthSession) -> anyhow::Result<()> {
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(())
    }
    async fn clear_session(&self) -> anyhow::Result<()> {
        *self.session.lock().unwrap() = None;
        Ok(())
    }
    async fn load_baselines(&self) -> anyhow::Result<Vec<BaselineEntry>> {
        Ok(self.baselines.lock().unwrap().values().cloned().collect())
    }
    async fn save_baseline(&self, entry: &BaselineEntry) -> anyhow::Result<()> {
        self.baselines
            .lock()
            .unwrap()
            .insert(entry.path.clone(), entry.clone());
        Ok(())
    }
    async fn remove_baseline(&self, p: &str) -> anyhow::Result<()> {
        self.baselines.lock().unwrap().remove(p);
        Ok(())
    }
    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()> {
        let mut conflicts = self.conflicts.lock().unwrap();
        match conflicts.iter_mut().find(|c| c.id == conflict.id) {
            Some(existing) => *existing = conflict.clone(),
            None => conflicts.push(conflict.clone()),
        }
        Ok(())
    }
    async fn get_conflict(&self, id: &str) -> anyhow::Result<Option<SyncConflict>> {
        Ok(self.conflicts.lock().unwrap().iter().find(|c| c.id == id).cloned())
    }
    async fn get_conflict_by_path(&self, p: &str) -> anyhow::Result<Option<SyncConflict>> {
        Ok(self
            .conflicts
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.item_path == p)
            .cloned())
    }
    async fn list_conflicts(&self) -> anyhow::Result<Vec<SyncConflict>> {
        Ok(self.conflicts.lock().unwrap().clone())
    }
    async fn remove_conflict(&self, id: &str) -> anyhow::Result<bool> {
        let mut conflicts = self.conflicts.lock().unwrap();
        let before = conflicts.len();
        conflicts.retain(|c| c.id != id);
        Ok(conflicts.len() != before)
    }
    async fn append_history(&self, entry: &SyncHistoryEntry) -> anyhow::Result<()> {
        self.history.lock().unwrap().push(entry.clone());
        Ok(())
    }
    async fn recent_history(&self, limit: u32) -> anyhow::Result<Vec<SyncHistoryEntry>> {
        let history = self.history.lock().unwrap();
        Ok(history.iter().rev().take(limit as usize).cloned().collect())
    }
    async fn prune_history(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut history = self.history.lock().unwrap();
        let len = history.len();
        history.retain(|e| e.timestamp >= before);
        Ok((len - history.len()) as u64)
    }
    async fn load_sync_folders(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.folders.lock().unwrap().clone())
    }
    async fn save_sync_folders(&self, folder_ids: &[String]) -> anyhow::Result<()> {
        *self.folders.lock().unwrap() = folder_ids.to_vec();
        Ok(())
    }
}

// ============================================================================
// StaticAuth
// ============================================================================

/// Auth provider that accepts any well-formed credentials
#[derive(Default)]
pub struct StaticAuth;

#[async_trait::async_trait]
impl IAuthProvider for StaticAuth {
    async fn login(&self, credentials: &AuthCredentials) -> Result<AuthSession, AuthError> {
        Ok(AuthSession {
            user_id: "u1".into(),
            username: credentials.username.clone(),
            access_token: "access".into(),
            refresh_token: None,
            expires_at: None,
            server_info: ServerInfo::fallback(&credentials.server_url),
            created_at: Utc::now(),
        })
    }

    async fn refresh(&self, _session: &AuthSession) -> Result<AuthSession, AuthError> {
        Err(AuthError::RefreshFailed("no refresh token".into()))
    }

    async fn fetch_server_info(
        &self,
        server_url: &str,
        _access_token: &str,
    ) -> Result<ServerInfo, AuthError> {
        Ok(ServerInfo::fallback(server_url))
    }
}

// ============================================================================
// EngineFixture
// ============================================================================

/// An engine over a temporary sync folder and in-memory collaborators,
/// already logged in
pub struct EngineFixture {
    pub dir: TempDir,
    pub engine: Arc<SyncEngine>,
    pub auth: Arc<AuthGateway>,
    pub remote: Arc<MemoryRemote>,
    pub store: Arc<MemoryStore>,
}

impl EngineFixture {
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("sync")
    }
}

pub async fn logged_in_engine(tweak: impl FnOnce(&mut SyncConfig)) -> EngineFixture {
    let dir = TempDir::new().unwrap();
    let mut config = SyncConfig::new(dir.path().join("sync"), dir.path().join("db"));
    config.transfer.retry_base_delay_ms = 1;
    tweak(&mut config);
    std::fs::create_dir_all(&config.sync_folder).unwrap();

    let remote = Arc::new(MemoryRemote::new());
    let store = Arc::new(MemoryStore::default());
    let state = Arc::new(SyncStateMachine::new(config, store.clone()));
    let auth = Arc::new(AuthGateway::new(
        Arc::new(StaticAuth),
        remote.clone(),
        store.clone(),
    ));
    auth.login(&AuthCredentials::new("https://cloud.example.com", "alice", "pw"))
        .await
        .unwrap();
    let engine = Arc::new(SyncEngine::new(
        remote.clone(),
        Arc::new(LocalFileSystemAdapter::new()),
        store.clone(),
        Arc::new(SharedNetworkStatus::default()),
        state,
        auth.clone(),
    ));
    EngineFixture {
        dir,
        engine,
        auth,
        remote,
        store,
    }
}
