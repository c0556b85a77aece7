//! WebDAV client for the OxiCloud file tree
//!
//! Implements [`IRemoteStorage`] on top of `reqwest`. The client starts
//! unconfigured; [`IRemoteStorage::configure`] points it at
//! `{server}/dav/files/{username}` with the session's bearer token.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use oxisync_core::ports::IRemoteStorage;
//! use oxisync_webdav::WebDavClient;
//!
//! # async fn example(session: oxisync_core::domain::AuthSession) -> anyhow::Result<()> {
//! let client = WebDavClient::new()?;
//! client.configure(&session).await?;
//! for entry in client.list_directory("Documents").await? {
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use oxisync_core::domain::{AuthSession, RemoteEntry, RemoteError};
use oxisync_core::ports::{IRemoteStorage, RemoteSignature, UploadMode, UploadSession};
use reqwest::header::{CONTENT_TYPE, IF_MATCH, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::multistatus::{self, PROPFIND_BODY};
use crate::status::{error_for_status, error_for_transport};
use crate::upload::{self, PendingUpload, PARTIAL_UPDATE_CONTENT_TYPE};

/// Full uploads above this size use a chunked upload collection
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 8 * 1024 * 1024;

// ============================================================================
// Connection settings
// ============================================================================

#[derive(Debug)]
struct DavConfig {
    server_url: String,
    username: String,
    /// `{server}/dav/files/{user}` without trailing slash
    files_url: String,
    /// Decoded URL path of `files_url`, used to relativize hrefs
    files_root: String,
    access_token: String,
    supports_delta: bool,
    supports_chunked: bool,
}

impl DavConfig {
    fn from_session(session: &AuthSession) -> Result<Self, RemoteError> {
        let server_url = session.server_info.url.trim_end_matches('/').to_string();
        let files_url = format!(
            "{server_url}/dav/files/{}",
            urlencoding::encode(&session.username)
        );
        let parsed = url::Url::parse(&files_url)
            .map_err(|e| RemoteError::Protocol(format!("invalid WebDAV URL {files_url}: {e}")))?;
        let files_root = urlencoding::decode(parsed.path())
            .map_err(|e| RemoteError::Protocol(e.to_string()))?
            .into_owned();

        Ok(Self {
            server_url,
            username: session.username.clone(),
            files_url,
            files_root,
            access_token: session.access_token.clone(),
            supports_delta: session.server_info.supports_delta_sync,
            supports_chunked: session.server_info.supports_chunked_upload,
        })
    }

    /// Absolute URL of a relative path; `""` is the root collection
    fn url_for(&self, path: &str) -> String {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return format!("{}/", self.files_url);
        }
        let encoded: Vec<_> = trimmed.split('/').map(urlencoding::encode).collect();
        format!("{}/{}", self.files_url, encoded.join("/"))
    }

    fn uploads_url(&self, id: &str) -> String {
        format!(
            "{}/dav/uploads/{}/{}",
            self.server_url,
            urlencoding::encode(&self.username),
            id
        )
    }
}

fn dav_method(name: &'static str) -> Result<Method, RemoteError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| RemoteError::Protocol(format!("invalid method {name}: {e}")))
}

fn ensure_success(response: Response, what: &str) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(error_for_status(status, what))
    }
}

// ============================================================================
// WebDavClient
// ============================================================================

/// [`IRemoteStorage`] over WebDAV
pub struct WebDavClient {
    client: Client,
    config: RwLock<Option<Arc<DavConfig>>>,
    uploads: DashMap<String, PendingUpload>,
    chunk_threshold: u64,
}

impl WebDavClient {
    /// Creates an unconfigured client
    pub fn new() -> Result<Self, RemoteError> {
        let client = crate::http_client().map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            config: RwLock::new(None),
            uploads: DashMap::new(),
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        })
    }

    /// Sets the size above which full uploads are chunked
    pub fn with_chunk_threshold(mut self, bytes: u64) -> Self {
        self.chunk_threshold = bytes;
        self
    }

    /// Whether a session is configured
    pub async fn is_configured(&self) -> bool {
        self.config.read().await.is_some()
    }

    /// Number of upload sessions begun and not yet committed or aborted
    pub fn open_uploads(&self) -> usize {
        self.uploads.len()
    }

    async fn settings(&self) -> Result<Arc<DavConfig>, RemoteError> {
        self.config
            .read()
            .await
            .clone()
            .ok_or(RemoteError::NotConfigured)
    }

    fn request(&self, cfg: &DavConfig, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&cfg.access_token)
    }

    async fn send(builder: RequestBuilder) -> Result<Response, RemoteError> {
        builder.send().await.map_err(error_for_transport)
    }

    async fn propfind(
        &self,
        cfg: &DavConfig,
        path: &str,
        depth: &str,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let response = Self::send(
            self.request(cfg, dav_method("PROPFIND")?, &cfg.url_for(path))
                .header("Depth", depth)
                .header(CONTENT_TYPE, "application/xml")
                .body(PROPFIND_BODY),
        )
        .await?;
        let response = ensure_success(response, "PROPFIND")?;
        let xml = response.text().await.map_err(error_for_transport)?;

        let mut entries = Vec::new();
        for resource in multistatus::parse_multistatus(&xml)? {
            match multistatus::relative_path(&resource.href, &cfg.files_root) {
                Some(rel) => entries.push(resource.into_entry(rel)),
                None => debug!(href = %resource.href, "Skipping href outside the files root"),
            }
        }
        Ok(entries)
    }

    /// Streams the body of a ranged GET, tolerating servers that ignore `Range`.
    async fn read_body_range(
        response: Response,
        skip: u64,
        length: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        let mut out = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        let mut to_skip = skip;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(error_for_transport)?;
            let mut bytes = &chunk[..];
            if to_skip > 0 {
                let n = to_skip.min(bytes.len() as u64) as usize;
                bytes = &bytes[n..];
                to_skip -= n as u64;
            }
            let room = (length - out.len() as u64) as usize;
            out.extend_from_slice(&bytes[..bytes.len().min(room)]);
            if out.len() as u64 >= length {
                break;
            }
        }
        Ok(out)
    }

    async fn put_whole(
        &self,
        cfg: &DavConfig,
        session: &UploadSession,
        data: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let mut req = self.request(cfg, Method::PUT, &cfg.url_for(&session.path));
        if let Some(etag) = &session.if_match {
            req = req.header(IF_MATCH, upload::quoted(etag));
        }
        let response = Self::send(req.body(data)).await?;
        ensure_success(response, "PUT")?;
        Ok(())
    }

    async fn assemble_chunks(
        &self,
        cfg: &DavConfig,
        session: &UploadSession,
        collection_url: &str,
    ) -> Result<(), RemoteError> {
        let mut req = self
            .request(cfg, dav_method("MOVE")?, &format!("{collection_url}/.file"))
            .header("Destination", cfg.url_for(&session.path))
            .header("OC-Total-Length", session.total_size.to_string());
        if let Some(etag) = &session.if_match {
            req = req.header(IF_MATCH, upload::quoted(etag));
        }
        let response = Self::send(req).await?;
        ensure_success(response, "MOVE .file")?;
        Ok(())
    }

    async fn apply_patches(
        &self,
        cfg: &DavConfig,
        session: &UploadSession,
        mut ranges: Vec<(u64, Vec<u8>)>,
    ) -> Result<(), RemoteError> {
        ranges.sort_by_key(|(offset, _)| *offset);
        let url = cfg.url_for(&session.path);
        let mut if_match = session.if_match.clone();

        for (offset, data) in ranges {
            let mut req = self
                .request(cfg, Method::PATCH, &url)
                .header(CONTENT_TYPE, PARTIAL_UPDATE_CONTENT_TYPE)
                .header("X-Update-Range", upload::update_range(offset, data.len()));
            // Only the first patch is checked; later ones see our own ETag
            if let Some(etag) = if_match.take() {
                req = req.header(IF_MATCH, upload::quoted(&etag));
            }
            let response = Self::send(req.body(data)).await?;
            ensure_success(response, "PATCH")?;
        }
        Ok(())
    }

    async fn delete_url(&self, cfg: &DavConfig, url: &str) -> Result<(), RemoteError> {
        let response = Self::send(self.request(cfg, Method::DELETE, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, "DELETE")?;
        Ok(())
    }
}

// ============================================================================
// IRemoteStorage implementation
// ============================================================================

#[async_trait::async_trait]
impl IRemoteStorage for WebDavClient {
    async fn configure(&self, session: &AuthSession) -> Result<(), RemoteError> {
        let cfg = DavConfig::from_session(session)?;
        info!(url = %cfg.files_url, delta = cfg.supports_delta, "WebDAV client configured");
        *self.config.write().await = Some(Arc::new(cfg));
        Ok(())
    }

    async fn clear(&self) {
        *self.config.write().await = None;
        self.uploads.clear();
        debug!("WebDAV client cleared");
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let cfg = self.settings().await?;
        let own = path.trim_matches('/');
        let mut entries: Vec<_> = self
            .propfind(&cfg, path, "1")
            .await?
            .into_iter()
            .filter(|e| e.path != own)
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(count = entries.len(), "Listed remote directory");
        Ok(entries)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn stat(&self, path: &str) -> Result<Option<RemoteEntry>, RemoteError> {
        let cfg = self.settings().await?;
        let own = path.trim_matches('/');
        match self.propfind(&cfg, path, "0").await {
            Ok(entries) => Ok(entries.into_iter().find(|e| e.path == own)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn download_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let cfg = self.settings().await?;
        let last = offset + length - 1;
        let response = Self::send(
            self.request(&cfg, Method::GET, &cfg.url_for(path))
                .header(RANGE, format!("bytes={offset}-{last}")),
        )
        .await?;

        let data = match response.status() {
            StatusCode::PARTIAL_CONTENT => Self::read_body_range(response, 0, length).await?,
            StatusCode::OK => Self::read_body_range(response, offset, length).await?,
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return Err(RemoteError::Protocol(format!(
                    "range {offset}-{last} outside {path}"
                )))
            }
            status => return Err(error_for_status(status, "GET")),
        };
        debug!(offset, bytes = data.len(), "Downloaded range");
        Ok(data)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn signature(&self, path: &str, block_size: u64) -> Result<RemoteSignature, RemoteError> {
        let cfg = self.settings().await?;
        if !cfg.supports_delta {
            return Err(RemoteError::Unsupported("block signatures".into()));
        }
        let url = format!("{}/api/sync/signature", cfg.server_url);
        let response = Self::send(self.request(&cfg, Method::GET, &url).query(&[
            ("path", path.to_string()),
            ("block_size", block_size.to_string()),
        ]))
        .await?;
        let response = ensure_success(response, "signature")?;
        response
            .json::<RemoteSignature>()
            .await
            .map_err(|e| RemoteError::Protocol(format!("invalid signature response: {e}")))
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn begin_upload(
        &self,
        path: &str,
        mode: UploadMode,
        total_size: u64,
        if_match: Option<&str>,
    ) -> Result<UploadSession, RemoteError> {
        let cfg = self.settings().await?;
        let id = Uuid::new_v4().simple().to_string();

        let pending = match mode {
            UploadMode::Delta if !cfg.supports_delta => {
                return Err(RemoteError::Unsupported("partial updates".into()))
            }
            UploadMode::Delta => PendingUpload::Patch { ranges: Vec::new() },
            UploadMode::Full if cfg.supports_chunked && total_size > self.chunk_threshold => {
                let collection_url = cfg.uploads_url(&id);
                let response = Self::send(
                    self.request(&cfg, dav_method("MKCOL")?, &collection_url)
                        .header("Destination", cfg.url_for(path)),
                )
                .await?;
                ensure_success(response, "MKCOL upload collection")?;
                PendingUpload::Chunked { collection_url }
            }
            UploadMode::Full => PendingUpload::buffered(total_size),
        };

        debug!(upload_id = %id, ?mode, total_size, "Upload session started");
        self.uploads.insert(id.clone(), pending);
        Ok(UploadSession {
            id,
            path: path.to_string(),
            mode,
            total_size,
            if_match: if_match.map(String::from),
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let chunk_url = {
            let mut pending = self
                .uploads
                .get_mut(&session.id)
                .ok_or_else(|| RemoteError::NotFound(format!("upload session {}", session.id)))?;
            match pending.value_mut() {
                PendingUpload::Buffered { data: buf } => {
                    upload::write_at(buf, offset, &data);
                    return Ok(());
                }
                PendingUpload::Patch { ranges } => {
                    ranges.push((offset, data));
                    return Ok(());
                }
                PendingUpload::Chunked { collection_url } => {
                    format!("{collection_url}/{}", upload::chunk_name(offset))
                }
            }
        };

        let cfg = self.settings().await?;
        let response = Self::send(self.request(&cfg, Method::PUT, &chunk_url).body(data)).await?;
        ensure_success(response, "PUT chunk")?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(path = %session.path, upload_id = %session.id))]
    async fn commit_upload(&self, session: &UploadSession) -> Result<RemoteEntry, RemoteError> {
        let cfg = self.settings().await?;
        let (_, pending) = self
            .uploads
            .remove(&session.id)
            .ok_or_else(|| RemoteError::NotFound(format!("upload session {}", session.id)))?;

        match pending {
            PendingUpload::Buffered { data } => {
                if data.len() as u64 != session.total_size {
                    return Err(RemoteError::Protocol(format!(
                        "upload holds {} of {} bytes",
                        data.len(),
                        session.total_size
                    )));
                }
                self.put_whole(&cfg, session, data).await?;
            }
            PendingUpload::Chunked { collection_url } => {
                if let Err(e) = self.assemble_chunks(&cfg, session, &collection_url).await {
                    if let Err(cleanup) = self.delete_url(&cfg, &collection_url).await {
                        warn!(error = %cleanup, "Failed to remove upload collection");
                    }
                    return Err(e);
                }
            }
            PendingUpload::Patch { ranges } => {
                self.apply_patches(&cfg, session, ranges).await?;
            }
        }

        let entry = self.stat(&session.path).await?.ok_or_else(|| {
            RemoteError::Protocol(format!("{} missing after upload", session.path))
        })?;
        info!(size = entry.size, etag = ?entry.etag, "Upload committed");
        Ok(entry)
    }

    async fn abort_upload(&self, session: &UploadSession) -> Result<(), RemoteError> {
        let Some((_, pending)) = self.uploads.remove(&session.id) else {
            return Ok(());
        };
        if let PendingUpload::Chunked { collection_url } = pending {
            let cfg = self.settings().await?;
            self.delete_url(&cfg, &collection_url).await?;
        }
        debug!(upload_id = %session.id, path = %session.path, "Upload aborted");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_directory(&self, path: &str) -> Result<(), RemoteError> {
        let cfg = self.settings().await?;
        let response =
            Self::send(self.request(&cfg, dav_method("MKCOL")?, &cfg.url_for(path))).await?;
        // 405 means the collection already exists
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }
        ensure_success(response, "MKCOL")?;
        debug!("Created remote directory");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let cfg = self.settings().await?;
        self.delete_url(&cfg, &cfg.url_for(path)).await?;
        debug!("Deleted remote item");
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn move_item(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let cfg = self.settings().await?;
        let response = Self::send(
            self.request(&cfg, dav_method("MOVE")?, &cfg.url_for(from))
                .header("Destination", cfg.url_for(to))
                .header("Overwrite", "F"),
        )
        .await?;
        ensure_success(response, "MOVE")?;
        debug!("Moved remote item");
        Ok(())
    }
}
