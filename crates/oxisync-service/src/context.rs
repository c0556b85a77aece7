//! Everything that exists between `initialize` and `shutdown`

use std::sync::Arc;

use oxisync_core::config::SyncConfig;
use oxisync_core::ports::{
    IAuthProvider, ILocalFileSystem, IRemoteStorage, IStateStore, IStateStoreFactory,
};
use oxisync_sync::network::SharedNetworkStatus;
use oxisync_sync::{AuthGateway, ConfigGateway, PeriodicSync, SyncEngine, SyncError, SyncStateMachine};
use tracing::{info, warn};

use crate::error::ApiError;

/// Adapters the service builds every engine context from
#[derive(Clone)]
pub struct Collaborators {
    pub remote: Arc<dyn IRemoteStorage>,
    pub auth_provider: Arc<dyn IAuthProvider>,
    pub store_factory: Arc<dyn IStateStoreFactory>,
    pub fs: Arc<dyn ILocalFileSystem>,
    /// Updated by `set_network_status`
    pub network: Arc<SharedNetworkStatus>,
}

/// The engine and its gateways for one initialized session
pub struct EngineContext {
    pub store: Arc<dyn IStateStore>,
    pub state: Arc<SyncStateMachine>,
    pub auth: Arc<AuthGateway>,
    pub engine: Arc<SyncEngine>,
    pub periodic: Arc<PeriodicSync>,
    pub config: ConfigGateway,
    pub network: Arc<SharedNetworkStatus>,
}

impl EngineContext {
    /// Opens the store named by `config` and wires the engine around it.
    ///
    /// `config` becomes the active and persisted configuration; a session
    /// stored by an earlier run is restored.
    pub async fn open(collaborators: &Collaborators, config: SyncConfig) -> Result<Self, ApiError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(SyncError::InvalidConfig(errors).into());
        }

        let store = collaborators
            .store_factory
            .open(&config.database_path)
            .await?;
        store.save_config(&config).await?;

        let state = Arc::new(SyncStateMachine::new(config, store.clone()));
        let auth = Arc::new(AuthGateway::new(
            collaborators.auth_provider.clone(),
            collaborators.remote.clone(),
            store.clone(),
        ));
        match auth.restore().await {
            Ok(true) => info!("Previous session restored"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Stored session could not be restored"),
        }

        let engine = Arc::new(SyncEngine::new(
            collaborators.remote.clone(),
            collaborators.fs.clone(),
            store.clone(),
            collaborators.network.clone(),
            state.clone(),
            auth.clone(),
        ));
        let periodic = Arc::new(PeriodicSync::new(engine.clone()));
        let config = ConfigGateway::new(store.clone(), state.clone(), engine.clone(), periodic.clone());

        Ok(Self {
            store,
            state,
            auth,
            engine,
            periodic,
            config,
            network: collaborators.network.clone(),
        })
    }

    /// Stops the timer and watcher, cancels the running pass, returns the
    /// engine to `Idle` and lifts the throttles.
    pub async fn teardown(&self) {
        self.periodic.stop().await;
        self.engine.halt().await;
        self.state.force_idle();
        self.engine.throttles().clear();
        self.auth.forget().await;
        info!("Engine context torn down");
    }
}
