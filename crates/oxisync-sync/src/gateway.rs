//! Configuration and session gateways
//!
//! [`ConfigGateway`] is the single path through which the configuration
//! changes at runtime. [`AuthGateway`] owns the authenticated session: it is
//! loaded once when the engine starts, and every later read is served from
//! memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use oxisync_core::config::{SyncConfig, ValidationError};
use oxisync_core::domain::{AuthCredentials, AuthError, AuthResult, AuthSession, ServerInfo};
use oxisync_core::ports::{IAuthProvider, IRemoteStorage, IStateStore};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::engine::SyncEngine;
use crate::scheduler::PeriodicSync;
use crate::state::SyncStateMachine;
use crate::SyncError;

// ============================================================================
// ConfigGateway
// ============================================================================

/// Validates, persists and applies configuration updates
pub struct ConfigGateway {
    store: Arc<dyn IStateStore>,
    state: Arc<SyncStateMachine>,
    engine: Arc<SyncEngine>,
    periodic: Arc<PeriodicSync>,
    /// Serializes updates so persist and apply happen as one step
    update_lock: Mutex<()>,
}

impl ConfigGateway {
    pub fn new(
        store: Arc<dyn IStateStore>,
        state: Arc<SyncStateMachine>,
        engine: Arc<SyncEngine>,
        periodic: Arc<PeriodicSync>,
    ) -> Self {
        Self {
            store,
            state,
            engine,
            periodic,
            update_lock: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Arc<SyncConfig> {
        self.state.config()
    }

    /// Replaces the active configuration.
    ///
    /// Every validation problem is reported at once. Nothing is persisted
    /// or applied unless the whole update is valid and stored.
    #[instrument(skip_all)]
    pub async fn update(&self, config: SyncConfig) -> Result<(), SyncError> {
        let _guard = self.update_lock.lock().await;

        let errors = config.validate();
        if !errors.is_empty() {
            warn!(errors = errors.len(), "Configuration update rejected");
            return Err(SyncError::InvalidConfig(errors));
        }

        self.store.save_config(&config).await?;

        self.engine.apply_config(&config);
        self.state.replace_config(config);
        self.periodic.rearm().await;

        info!("Configuration updated");
        Ok(())
    }

    /// Parses a serialized configuration and applies it with [`Self::update`].
    ///
    /// Values the schema cannot express (a negative interval or speed cap)
    /// fail to parse and are reported as validation errors.
    pub async fn update_from_json(&self, json: &str) -> Result<(), SyncError> {
        let config: SyncConfig = serde_json::from_str(json).map_err(|e| {
            SyncError::InvalidConfig(vec![ValidationError::new("config", e.to_string())])
        })?;
        self.update(config).await
    }
}

// ============================================================================
// AuthGateway
// ============================================================================

/// Owns the authenticated session and keeps the remote adapter configured
pub struct AuthGateway {
    provider: Arc<dyn IAuthProvider>,
    remote: Arc<dyn IRemoteStorage>,
    store: Arc<dyn IStateStore>,
    session: RwLock<Option<AuthSession>>,
    /// Set when the server rejected the current access token
    invalidated: AtomicBool,
    refresh_lock: Mutex<()>,
}

impl AuthGateway {
    pub fn new(
        provider: Arc<dyn IAuthProvider>,
        remote: Arc<dyn IRemoteStorage>,
        store: Arc<dyn IStateStore>,
    ) -> Self {
        Self {
            provider,
            remote,
            store,
            session: RwLock::new(None),
            invalidated: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Loads the persisted session, if any, and configures the remote adapter.
    pub async fn restore(&self) -> Result<bool, AuthError> {
        let Some(session) = self
            .store
            .load_session()
            .await
            .map_err(|e| AuthError::Storage(format!("{e:#}")))?
        else {
            debug!("No stored session");
            return Ok(false);
        };

        if let Err(e) = self.remote.configure(&session).await {
            warn!(error = %e, "Failed to configure remote storage from stored session");
        }
        info!(user = %session.username, "Session restored");
        self.set_session(Some(session));
        Ok(true)
    }

    /// Logs in and stores the resulting session.
    #[instrument(skip_all, fields(server = %credentials.server_url, user = %credentials.username))]
    pub async fn login(&self, credentials: &AuthCredentials) -> Result<AuthResult, AuthError> {
        credentials.validate()?;
        let session = self.provider.login(credentials).await?;
        self.install(session).await?;
        let session = self.session().ok_or(AuthError::SessionExpired)?;
        info!(user_id = %session.user_id, "Login complete");
        Ok(AuthResult::from(&session))
    }

    /// Pure read: a session is held, its token has not expired and the
    /// server has not rejected it.
    pub fn is_logged_in(&self) -> bool {
        self.read_session().as_ref().is_some_and(|s| !s.is_expired())
            && !self.invalidated.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.read_session().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.read_session().as_ref().map(|s| s.server_info.clone())
    }

    /// Re-reads capabilities and quota from the server.
    pub async fn refresh_server_info(&self) -> Result<ServerInfo, AuthError> {
        let session = self.session().ok_or(AuthError::SessionExpired)?;
        let info = self
            .provider
            .fetch_server_info(&session.server_info.url, &session.access_token)
            .await?;

        let mut updated = session;
        updated.server_info = info.clone();
        self.persist(&updated).await?;
        self.set_session(Some(updated));
        Ok(info)
    }

    /// Renews the access token when it is about to expire or was rejected.
    ///
    /// Returns whether a refresh happened.
    pub async fn refresh_if_needed(&self) -> Result<bool, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        let session = self.session().ok_or(AuthError::SessionExpired)?;
        if !session.needs_refresh() && !self.invalidated.load(Ordering::SeqCst) {
            return Ok(false);
        }

        debug!(user = %session.username, "Refreshing access token");
        let refreshed = self.provider.refresh(&session).await?;
        self.install(refreshed).await?;
        info!("Access token refreshed");
        Ok(true)
    }

    /// Session for a pass, refreshed first when necessary.
    pub async fn ensure_session(&self) -> Result<AuthSession, SyncError> {
        if self.read_session().is_none() {
            return Err(SyncError::NotAuthenticated);
        }
        match self.refresh_if_needed().await {
            Ok(_) => {}
            Err(e) => {
                let unusable = self.invalidated.load(Ordering::SeqCst)
                    || self.session().is_some_and(|s| s.is_expired());
                if unusable {
                    warn!(error = %e, "Session unusable and refresh failed");
                    return Err(SyncError::NotAuthenticated);
                }
                warn!(error = %e, "Token refresh failed, continuing with current token");
            }
        }
        self.session().ok_or(SyncError::NotAuthenticated)
    }

    /// Clears the session from memory, the store and the remote adapter.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.set_session(None);
        self.invalidated.store(false, Ordering::SeqCst);
        self.remote.clear().await;
        self.store
            .clear_session()
            .await
            .map_err(|e| AuthError::Storage(format!("{e:#}")))?;
        info!("Logged out");
        Ok(())
    }

    /// Drops the in-memory session and the remote credentials; the stored
    /// session survives for the next start.
    pub async fn forget(&self) {
        self.set_session(None);
        self.invalidated.store(false, Ordering::SeqCst);
        self.remote.clear().await;
        debug!("Session released");
    }

    /// Marks the session unusable after the server answered 401.
    pub fn invalidate(&self) {
        if !self.invalidated.swap(true, Ordering::SeqCst) {
            warn!("Server rejected the session, marking it invalid");
        }
    }

    async fn install(&self, session: AuthSession) -> Result<(), AuthError> {
        self.persist(&session).await?;
        self.remote
            .configure(&session)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        self.set_session(Some(session));
        self.invalidated.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn persist(&self, session: &AuthSession) -> Result<(), AuthError> {
        self.store
            .save_session(session)
            .await
            .map_err(|e| AuthError::Storage(format!("{e:#}")))
    }

    fn set_session(&self, session: Option<AuthSession>) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
    }

    fn read_session(&self) -> std::sync::RwLockReadGuard<'_, Option<AuthSession>> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::test_support::{MemoryRemote, MemoryStore};

    const SERVER: &str = "https://cloud.example.com";

    struct FakeProvider {
        refreshes: AtomicU32,
        refresh_fails: bool,
        expires_in: Option<Duration>,
    }

    impl FakeProvider {
        fn new(expires_in: Option<Duration>) -> Self {
            Self {
                refreshes: AtomicU32::new(0),
                refresh_fails: false,
                expires_in,
            }
        }
    }

    #[async_trait::async_trait]
    impl IAuthProvider for FakeProvider {
        async fn login(&self, credentials: &AuthCredentials) -> Result<AuthSession, AuthError> {
            if credentials.password != "secret" {
                return Err(AuthError::InvalidCredentials);
            }
            Ok(AuthSession {
                user_id: "u1".into(),
                username: credentials.username.clone(),
                access_token: "access-1".into(),
                refresh_token: Some("refresh-1".into()),
                expires_at: self.expires_in.map(|d| Utc::now() + d),
                server_info: ServerInfo::fallback(&credentials.server_url),
                created_at: Utc::now(),
            })
        }

        async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, AuthError> {
            if self.refresh_fails {
                return Err(AuthError::RefreshFailed("rejected".into()));
            }
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 2;
            let mut s = session.clone();
            s.access_token = format!("access-{n}");
            s.expires_at = Some(Utc::now() + Duration::hours(1));
            Ok(s)
        }

        async fn fetch_server_info(
            &self,
            server_url: &str,
            _access_token: &str,
        ) -> Result<ServerInfo, AuthError> {
            let mut info = ServerInfo::fallback(server_url);
            info.version = "2.0".into();
            Ok(info)
        }
    }

    fn gateway(provider: FakeProvider) -> (AuthGateway, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let gw = AuthGateway::new(
            Arc::new(provider),
            Arc::new(MemoryRemote::new()),
            store.clone(),
        );
        (gw, store)
    }

    #[tokio::test]
    async fn test_login_stores_session() {
        let (gw, store) = gateway(FakeProvider::new(None));
        assert!(!gw.is_logged_in());

        let result = gw
            .login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.username, "alice");
        assert!(gw.is_logged_in());
        assert!(store.load_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_login_rejects_bad_input() {
        let (gw, _) = gateway(FakeProvider::new(None));
        let err = gw
            .login(&AuthCredentials::new("ftp://x", "alice", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidServerUrl(_)));

        let err = gw
            .login(&AuthCredentials::new(SERVER, "alice", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert!(!gw.is_logged_in());
    }

    #[tokio::test]
    async fn test_restore_and_logout() {
        let (gw, store) = gateway(FakeProvider::new(None));
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();

        let (other, _) = gateway(FakeProvider::new(None));
        let restored = AuthGateway::new(
            Arc::new(FakeProvider::new(None)),
            Arc::new(MemoryRemote::new()),
            store.clone(),
        );
        assert!(!other.restore().await.unwrap());
        assert!(restored.restore().await.unwrap());
        assert!(restored.is_logged_in());

        restored.logout().await.unwrap();
        assert!(!restored.is_logged_in());
        assert!(store.load_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_only_near_expiry() {
        let (gw, _) = gateway(FakeProvider::new(Some(Duration::hours(2))));
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        assert!(!gw.refresh_if_needed().await.unwrap());

        let (gw, _) = gateway(FakeProvider::new(Some(Duration::minutes(1))));
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        assert!(gw.refresh_if_needed().await.unwrap());
        assert_eq!(gw.session().unwrap().access_token, "access-2");
    }

    #[tokio::test]
    async fn test_invalidated_session_is_refreshed_or_rejected() {
        let (gw, _) = gateway(FakeProvider::new(None));
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        gw.invalidate();
        assert!(!gw.is_logged_in());
        let session = gw.ensure_session().await.unwrap();
        assert_eq!(session.access_token, "access-2");
        assert!(gw.is_logged_in());

        let mut failing = FakeProvider::new(None);
        failing.refresh_fails = true;
        let (gw, _) = gateway(failing);
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        gw.invalidate();
        assert!(matches!(
            gw.ensure_session().await,
            Err(SyncError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_not_logged_in_until_refreshed() {
        let (gw, _) = gateway(FakeProvider::new(Some(Duration::hours(-1))));
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        assert!(gw.session().unwrap().is_expired());
        assert!(!gw.is_logged_in());

        let session = gw.ensure_session().await.unwrap();
        assert_eq!(session.access_token, "access-2");
        assert!(gw.is_logged_in());

        let mut failing = FakeProvider::new(Some(Duration::hours(-1)));
        failing.refresh_fails = true;
        let (gw, _) = gateway(failing);
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        assert!(!gw.is_logged_in());
        assert!(matches!(
            gw.ensure_session().await,
            Err(SyncError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_refresh_server_info_updates_session() {
        let (gw, _) = gateway(FakeProvider::new(None));
        assert!(gw.refresh_server_info().await.is_err());
        gw.login(&AuthCredentials::new(SERVER, "alice", "secret"))
            .await
            .unwrap();
        let info = gw.refresh_server_info().await.unwrap();
        assert_eq!(info.version, "2.0");
        assert_eq!(gw.server_info().unwrap().version, "2.0");
    }

    // ------------------------------------------------------------------
    // ConfigGateway
    // ------------------------------------------------------------------

    async fn config_gateway() -> (ConfigGateway, crate::test_support::EngineFixture) {
        let f = crate::test_support::logged_in_engine(|c| c.watch_filesystem = false).await;
        let periodic = Arc::new(PeriodicSync::new(f.engine.clone()));
        let gw = ConfigGateway::new(
            f.store.clone(),
            f.engine.state().clone(),
            f.engine.clone(),
            periodic,
        );
        (gw, f)
    }

    #[tokio::test]
    async fn test_rejected_update_changes_nothing() {
        let (gw, f) = config_gateway().await;
        let before = gw.current();

        let mut bad = (*before).clone();
        bad.sync_folder = "relative/path".into();
        bad.max_upload_speed_kbps = 64;
        bad.ignore_patterns.push("[".into());
        let err = gw.update(bad).await.unwrap_err();
        match err {
            SyncError::InvalidConfig(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(gw.current(), before);
        assert!(f.store.load_config().await.unwrap().is_none());
        assert!(f.engine.throttles().upload.is_unlimited());
    }

    #[tokio::test]
    async fn test_negative_values_fail_to_parse() {
        let (gw, f) = config_gateway().await;
        let before = gw.current();

        let err = gw
            .update_from_json(r#"{"sync_interval_seconds": -5}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
        let err = gw
            .update_from_json(r#"{"max_download_speed_kbps": -1}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));

        assert_eq!(gw.current(), before);
        assert!(f.store.load_config().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_valid_update_is_persisted_and_applied() {
        let (gw, f) = config_gateway().await;
        let mut next = (*gw.current()).clone();
        next.max_upload_speed_kbps = 100;
        next.sync_interval_seconds = 60;
        next.conflicts.strategy = "keep_both".into();

        gw.update(next.clone()).await.unwrap();

        assert_eq!(*gw.current(), next);
        assert_eq!(f.store.load_config().await.unwrap(), Some(next));
        assert_eq!(f.engine.throttles().upload.rate(), 100 * 1024);
        assert!(f.engine.throttles().download.is_unlimited());
    }
}
