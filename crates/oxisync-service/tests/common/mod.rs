//! Shared fixtures for the service integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use oxisync_cache::SqliteStoreFactory;
use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{
    path, AuthCredentials, AuthError, AuthSession, RemoteEntry, RemoteError, ServerInfo,
};
use oxisync_core::ports::{
    IAuthProvider, IRemoteStorage, RemoteSignature, UploadMode, UploadSession,
};
use oxisync_service::{Collaborators, EngineHandle, EngineService};
use oxisync_sync::filesystem::LocalFileSystemAdapter;
use oxisync_sync::network::SharedNetworkStatus;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

pub const SERVER: &str = "https://cloud.example.com";

// ============================================================================
// FakeCloud
// ============================================================================

#[derive(Clone)]
struct Node {
    data: Vec<u8>,
    is_dir: bool,
    etag: String,
    modified: DateTime<Utc>,
}

/// Remote tree in memory, counting uploads
#[derive(Default)]
pub struct FakeCloud {
    nodes: Mutex<BTreeMap<String, Node>>,
    sessions: Mutex<HashMap<String, (UploadSession, Vec<u8>)>>,
    etags: AtomicU64,
    commits: AtomicU64,
}

impl FakeCloud {
    pub fn put_file(&self, p: &str, data: &[u8]) {
        let node = Node {
            data: data.to_vec(),
            is_dir: false,
            etag: self.next_etag(),
            modified: Utc::now(),
        };
        self.nodes.lock().unwrap().insert(p.to_string(), node);
    }

    pub fn put_dir(&self, p: &str) {
        let node = Node {
            data: Vec::new(),
            is_dir: true,
            etag: self.next_etag(),
            modified: Utc::now(),
        };
        self.nodes.lock().unwrap().insert(p.to_string(), node);
    }

    pub fn content(&self, p: &str) -> Option<Vec<u8>> {
        self.nodes.lock().unwrap().get(p).map(|n| n.data.clone())
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn next_etag(&self) -> String {
        format!("\"e{}\"", self.etags.fetch_add(1, Ordering::SeqCst))
    }

    fn entry(p: &str, node: &Node) -> RemoteEntry {
        RemoteEntry {
            path: p.to_string(),
            is_directory: node.is_dir,
            size: node.data.len() as u64,
            modified: node.modified,
            content_hash: (!node.is_dir).then(|| format!("{:x}", Sha256::digest(&node.data))),
            etag: Some(node.etag.clone()),
            mime_type: None,
        }
    }
}

#[async_trait::async_trait]
impl IRemoteStorage for FakeCloud {
    async fn configure(&self, _session: &AuthSession) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn clear(&self) {}

    async fn list_directory(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| path::parent(p).unwrap_or("") == dir)
            .map(|(p, n)| Self::entry(p, n))
            .collect())
    }

    async fn stat(&self, p: &str) -> Result<Option<RemoteEntry>, RemoteError> {
        Ok(self.nodes.lock().unwrap().get(p).map(|n| Self::entry(p, n)))
    }

    async fn download_range(
        &self,
        p: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        let nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get(p)
            .ok_or_else(|| RemoteError::NotFound(p.to_string()))?;
        let start = (offset as usize).min(node.data.len());
        let end = (start + length as usize).min(node.data.len());
        Ok(node.data[start..end].to_vec())
    }

    async fn signature(&self, p: &str, _block_size: u64) -> Result<RemoteSignature, RemoteError> {
        Err(RemoteError::Unsupported(format!("signature of {p}")))
    }

    async fn begin_upload(
        &self,
        p: &str,
        mode: UploadMode,
        total_size: u64,
        if_match: Option<&str>,
    ) -> Result<UploadSession, RemoteError> {
        if let Some(expected) = if_match {
            let nodes = self.nodes.lock().unwrap();
            if nodes.get(p).map(|n| n.etag.as_str()) != Some(expected) {
                return Err(RemoteError::PreconditionFailed(p.to_string()));
            }
        }
        let session = UploadSession {
            id: uuid::Uuid::new_v4().to_string(),
            path: p.to_string(),
            mode,
            total_size,
            if_match: if_match.map(str::to_string),
        };
        self.sessions.lock().unwrap().insert(
            session.id.clone(),
            (session.clone(), vec![0; total_size as usize]),
        );
        Ok(session)
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let mut sessions = self.sessions.lock().unwrap();
        let (_, buffer) = sessions
            .get_mut(&session.id)
            .ok_or_else(|| RemoteError::NotFound(session.id.clone()))?;
        let start = offset as usize;
        buffer[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    }

    async fn commit_upload(&self, session: &UploadSession) -> Result<RemoteEntry, RemoteError> {
        let (_, data) = self
            .sessions
            .lock()
            .unwrap()
            .remove(&session.id)
            .ok_or_else(|| RemoteError::NotFound(session.id.clone()))?;
        let node = Node {
            data,
            is_dir: false,
            etag: self.next_etag(),
            modified: Utc::now(),
        };
        let entry = Self::entry(&session.path, &node);
        self.nodes
            .lock()
            .unwrap()
            .insert(session.path.clone(), node);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }

    async fn abort_upload(&self, session: &UploadSession) -> Result<(), RemoteError> {
        self.sessions.lock().unwrap().remove(&session.id);
        Ok(())
    }

    async fn create_directory(&self, p: &str) -> Result<(), RemoteError> {
        self.put_dir(p);
        Ok(())
    }

    async fn delete(&self, p: &str) -> Result<(), RemoteError> {
        self.nodes
            .lock()
            .unwrap()
            .retain(|k, _| !path::is_within(k, p));
        Ok(())
    }

    async fn move_item(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .remove(from)
            .ok_or_else(|| RemoteError::NotFound(from.to_string()))?;
        nodes.insert(to.to_string(), node);
        Ok(())
    }
}

// ============================================================================
// FakeAuth
// ============================================================================

/// Accepts the password "secret"
pub struct FakeAuth;

#[async_trait::async_trait]
impl IAuthProvider for FakeAuth {
    async fn login(&self, credentials: &AuthCredentials) -> Result<AuthSession, AuthError> {
        if credentials.password != "secret" {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(AuthSession {
            user_id: "u-1".into(),
            username: credentials.username.clone(),
            access_token: "token".into(),
            refresh_token: None,
            expires_at: None,
            server_info: ServerInfo::fallback(&credentials.server_url),
            created_at: Utc::now(),
        })
    }

    async fn refresh(&self, _session: &AuthSession) -> Result<AuthSession, AuthError> {
        Err(AuthError::RefreshFailed("not supported".into()))
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
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub cloud: Arc<FakeCloud>,
    pub network: Arc<SharedNetworkStatus>,
    pub engine: EngineHandle,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sync")).unwrap();
        let cloud = Arc::new(FakeCloud::default());
        let network = Arc::new(SharedNetworkStatus::default());
        let (engine, _task) = EngineService::spawn(Collaborators {
            remote: cloud.clone(),
            auth_provider: Arc::new(FakeAuth),
            store_factory: Arc::new(SqliteStoreFactory),
            fs: Arc::new(LocalFileSystemAdapter::new()),
            network: network.clone(),
        });
        Self {
            dir,
            cloud,
            network,
            engine,
        }
    }

    pub fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.root(), self.dir.path().join("state.db"));
        config.watch_filesystem = false;
        config.transfer.retry_base_delay_ms = 1;
        config
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("sync")
    }

    pub fn write(&self, rel: &str, data: &[u8]) {
        let p = self.root().join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, data).unwrap();
    }

    pub fn read(&self, rel: &str) -> Option<Vec<u8>> {
        std::fs::read(self.root().join(rel)).ok()
    }

    /// Initialized and logged in
    pub async fn ready(self) -> Self {
        self.engine.initialize(self.config()).await.unwrap();
        self.engine.login(SERVER, "alice", "secret").await.unwrap();
        self
    }
}
