//! The engine service task and its handle
//!
//! [`EngineService::spawn`] starts a task that receives [`Request`]s and runs
//! each one in its own task, so a long `sync_now` never blocks a status
//! query. Every request gets exactly one reply. Replies are not ordered
//! with respect to each other.
//!
//! ```text
//! host ──→ EngineHandle ──mpsc──→ service task ──spawn──→ handler ──oneshot──→ host
//!                                                           │
//!                                                     EngineContext
//! ```

use std::future::Future;
use std::sync::Arc;

use oxisync_core::config::SyncConfig;
use oxisync_core::domain::{
    path, AuthCredentials, AuthResult, ConflictResolution, RemoteFolder, ServerInfo,
    SyncConflict, SyncHistoryEntry, SyncItem, SyncResult, SyncStats, SyncStatusInfo,
};
use oxisync_core::ports::NetworkStatus;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::context::{Collaborators, EngineContext};
use crate::error::{ApiError, ApiErrorKind};
use crate::request::{Reply, Request};

/// Capacity of the request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// EngineService
// ============================================================================

/// Owns the engine context and answers requests
#[derive(Clone)]
pub struct EngineService {
    collaborators: Collaborators,
    context: Arc<RwLock<Option<Arc<EngineContext>>>>,
}

impl EngineService {
    /// Starts the service task.
    ///
    /// The task ends once every [`EngineHandle`] has been dropped; an
    /// engine still initialized at that point is torn down first.
    pub fn spawn(collaborators: Collaborators) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let service = Self {
            collaborators,
            context: Arc::new(RwLock::new(None)),
        };
        let task = tokio::spawn(service.run(rx));
        (EngineHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::Receiver<Request>) {
        info!("Engine service started");
        while let Some(request) = rx.recv().await {
            debug!(request = request.name(), "Request received");
            let service = self.clone();
            tokio::spawn(async move { service.handle(request).await });
        }

        if let Some(context) = self.context.write().await.take() {
            context.teardown().await;
        }
        info!("Engine service stopped");
    }

    async fn handle(&self, request: Request) {
        match request {
            Request::Initialize { config, reply } => respond(reply, self.initialize(config)).await,
            Request::Shutdown { reply } => respond(reply, self.shutdown()).await,
            Request::Login {
                server_url,
                username,
                password,
                reply,
            } => {
                let credentials = AuthCredentials::new(server_url, username, password);
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.auth.login(&credentials).await?)
                }))
                .await
            }
            Request::Logout { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    ctx.periodic.stop().await;
                    ctx.auth.logout().await?;
                    Ok(())
                }))
                .await
            }
            Request::IsLoggedIn { reply } => {
                respond(reply, self.with_context(|ctx| async move { Ok(ctx.auth.is_logged_in()) }))
                    .await
            }
            Request::GetConfig { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok((*ctx.config.current()).clone())
                }))
                .await
            }
            Request::UpdateConfig { config, reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.config.update(config).await?)
                }))
                .await
            }
            Request::GetServerInfo { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    ctx.auth.server_info().ok_or_else(ApiError::not_logged_in)
                }))
                .await
            }
            Request::GetRemoteFolders { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.engine.remote_folders().await?)
                }))
                .await
            }
            Request::GetSyncFolders { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.store.load_sync_folders().await?)
                }))
                .await
            }
            Request::SetSyncFolders { folder_ids, reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    set_sync_folders(&ctx, folder_ids).await
                }))
                .await
            }
            Request::StartSync { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    ctx.auth.ensure_session().await?;
                    Ok(ctx.periodic.start().await?)
                }))
                .await
            }
            Request::StopSync { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    ctx.periodic.stop().await;
                    ctx.engine.halt().await;
                    ctx.state.force_idle();
                    Ok(())
                }))
                .await
            }
            Request::SyncNow { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.engine.sync_now().await?)
                }))
                .await
            }
            Request::GetSyncStatus { reply } => {
                respond(reply, self.with_context(|ctx| async move { Ok(ctx.state.status()) }))
                    .await
            }
            Request::GetPendingItems { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.engine.pending_items())
                }))
                .await
            }
            Request::GetConflicts { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.engine.registry().list().await?)
                }))
                .await
            }
            Request::ResolveConflict {
                conflict_id,
                resolution,
                reply,
            } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.engine.resolve_conflict(&conflict_id, resolution).await?)
                }))
                .await
            }
            Request::GetSyncHistory { limit, reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.state.recent_history(limit).await?)
                }))
                .await
            }
            Request::SetNetworkStatus { status, reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    ctx.network.set(status);
                    Ok(())
                }))
                .await
            }
            Request::GetStats { reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.engine.stats().await?)
                }))
                .await
            }
            Request::ClearHistory { keep_days, reply } => {
                respond(reply, self.with_context(|ctx| async move {
                    Ok(ctx.state.prune_history(keep_days).await?)
                }))
                .await
            }
        }
    }

    /// Builds a fresh context, replacing (and tearing down) any current one.
    #[instrument(skip_all)]
    async fn initialize(&self, config: SyncConfig) -> Result<(), ApiError> {
        let mut slot = self.context.write().await;
        if let Some(previous) = slot.take() {
            info!("Re-initializing, tearing down the previous engine");
            previous.teardown().await;
        }
        let context = EngineContext::open(&self.collaborators, config).await?;
        *slot = Some(Arc::new(context));
        info!("Engine initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ApiError> {
        match self.context.write().await.take() {
            Some(context) => {
                context.teardown().await;
                info!("Engine shut down");
            }
            None => debug!("Shutdown without an initialized engine"),
        }
        Ok(())
    }

    /// Runs `op` against the current context, or fails with `NotInitialized`.
    ///
    /// The context lock is only held while the context is looked up.
    async fn with_context<T, F, Fut>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(Arc<EngineContext>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let context = self
            .context
            .read()
            .await
            .clone()
            .ok_or_else(ApiError::not_initialized)?;
        op(context).await
    }
}

async fn set_sync_folders(ctx: &EngineContext, folder_ids: Vec<String>) -> Result<(), ApiError> {
    let mut normalized = Vec::with_capacity(folder_ids.len());
    for id in folder_ids {
        let id = path::normalize(&id)
            .map_err(|e| ApiError::new(ApiErrorKind::ConfigInvalid, e.to_string()))?;
        if id.is_empty() {
            return Err(ApiError::new(
                ApiErrorKind::ConfigInvalid,
                "folder id must name a folder below the root",
            ));
        }
        if !normalized.contains(&id) {
            normalized.push(id);
        }
    }
    ctx.store.save_sync_folders(&normalized).await?;
    info!(folders = normalized.len(), "Selective sync folders updated");
    Ok(())
}

async fn respond<T>(reply: Reply<T>, result: impl Future<Output = Result<T, ApiError>>) {
    let result = result.await;
    if let Err(e) = &result {
        debug!(error = %e, "Request failed");
    }
    if reply.send(result).is_err() {
        warn!("Requester went away before the reply was sent");
    }
}

// ============================================================================
// EngineHandle
// ============================================================================

/// Cloneable sender side of the engine service
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Request>,
}

impl EngineHandle {
    /// Queues a raw request; the reply arrives on the channel it carries.
    pub async fn submit(&self, request: Request) -> Result<(), ApiError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ApiError::internal("engine service stopped"))
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.submit(build(reply)).await?;
        rx.await
            .map_err(|_| ApiError::internal("engine service dropped the request"))?
    }

    pub async fn initialize(&self, config: SyncConfig) -> Result<(), ApiError> {
        self.call(|reply| Request::Initialize { config, reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), ApiError> {
        self.call(|reply| Request::Shutdown { reply }).await
    }

    pub async fn login(
        &self,
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<AuthResult, ApiError> {
        let (server_url, username, password) = (server_url.into(), username.into(), password.into());
        self.call(|reply| Request::Login {
            server_url,
            username,
            password,
            reply,
        })
        .await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.call(|reply| Request::Logout { reply }).await
    }

    pub async fn is_logged_in(&self) -> Result<bool, ApiError> {
        self.call(|reply| Request::IsLoggedIn { reply }).await
    }

    pub async fn get_config(&self) -> Result<SyncConfig, ApiError> {
        self.call(|reply| Request::GetConfig { reply }).await
    }

    pub async fn update_config(&self, config: SyncConfig) -> Result<(), ApiError> {
        self.call(|reply| Request::UpdateConfig { config, reply })
            .await
    }

    pub async fn get_server_info(&self) -> Result<ServerInfo, ApiError> {
        self.call(|reply| Request::GetServerInfo { reply }).await
    }

    pub async fn get_remote_folders(&self) -> Result<Vec<RemoteFolder>, ApiError> {
        self.call(|reply| Request::GetRemoteFolders { reply }).await
    }

    pub async fn get_sync_folders(&self) -> Result<Vec<String>, ApiError> {
        self.call(|reply| Request::GetSyncFolders { reply }).await
    }

    pub async fn set_sync_folders(&self, folder_ids: Vec<String>) -> Result<(), ApiError> {
        self.call(|reply| Request::SetSyncFolders { folder_ids, reply })
            .await
    }

    pub async fn start_sync(&self) -> Result<(), ApiError> {
        self.call(|reply| Request::StartSync { reply }).await
    }

    pub async fn stop_sync(&self) -> Result<(), ApiError> {
        self.call(|reply| Request::StopSync { reply }).await
    }

    pub async fn sync_now(&self) -> Result<SyncResult, ApiError> {
        self.call(|reply| Request::SyncNow { reply }).await
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatusInfo, ApiError> {
        self.call(|reply| Request::GetSyncStatus { reply }).await
    }

    pub async fn get_pending_items(&self) -> Result<Vec<SyncItem>, ApiError> {
        self.call(|reply| Request::GetPendingItems { reply }).await
    }

    pub async fn get_conflicts(&self) -> Result<Vec<SyncConflict>, ApiError> {
        self.call(|reply| Request::GetConflicts { reply }).await
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: impl Into<String>,
        resolution: ConflictResolution,
    ) -> Result<(), ApiError> {
        let conflict_id = conflict_id.into();
        self.call(|reply| Request::ResolveConflict {
            conflict_id,
            resolution,
            reply,
        })
        .await
    }

    pub async fn get_sync_history(&self, limit: u32) -> Result<Vec<SyncHistoryEntry>, ApiError> {
        self.call(|reply| Request::GetSyncHistory { limit, reply })
            .await
    }

    pub async fn set_network_status(&self, status: NetworkStatus) -> Result<(), ApiError> {
        self.call(|reply| Request::SetNetworkStatus { status, reply })
            .await
    }

    pub async fn get_stats(&self) -> Result<SyncStats, ApiError> {
        self.call(|reply| Request::GetStats { reply }).await
    }

    pub async fn clear_history(&self, keep_days: u32) -> Result<u64, ApiError> {
        self.call(|reply| Request::ClearHistory { keep_days, reply })
            .await
    }
}
