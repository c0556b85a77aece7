//! OxiSync Daemon - Background synchronization service
//!
//! Runs the sync engine headless:
//! - Loads the YAML configuration
//! - Wires the WebDAV, SQLite and local filesystem adapters into the engine
//! - Starts periodic and watcher-driven sync when a stored session exists
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! Logging in happens from a host application; the daemon reuses the session
//! it finds in the state database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use oxisync_cache::SqliteStoreFactory;
use oxisync_core::config::SyncConfig;
use oxisync_service::{ApiErrorKind, Collaborators, EngineHandle, EngineService};
use oxisync_sync::filesystem::LocalFileSystemAdapter;
use oxisync_sync::network::SharedNetworkStatus;
use oxisync_webdav::{HttpAuthProvider, WebDavClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "oxisyncd", version, about = "OxiSync background synchronization daemon")]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(SyncConfig::default_path)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Filter directive used when `RUST_LOG` is unset
fn default_directive(verbose: u8, configured_level: &str) -> String {
    match verbose {
        0 if configured_level.trim().is_empty() => "info".to_string(),
        0 => configured_level.trim().to_lowercase(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_tracing(cli: &Cli, config: &SyncConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(cli.verbose, &config.logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the engine handle for the lifetime of the process
struct DaemonService {
    config: SyncConfig,
    engine: EngineHandle,
    service_task: tokio::task::JoinHandle<()>,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: SyncConfig, shutdown: CancellationToken) -> Result<Self> {
        let collaborators = build_collaborators()?;
        let (engine, service_task) = EngineService::spawn(collaborators);
        Ok(Self {
            config,
            engine,
            service_task,
            shutdown,
        })
    }

    /// Initializes the engine, starts syncing if a session exists and waits
    /// for the shutdown signal.
    async fn run(self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.sync_folder)
            .await
            .with_context(|| {
                format!(
                    "Failed to create sync folder {}",
                    self.config.sync_folder.display()
                )
            })?;

        self.engine
            .initialize(self.config.clone())
            .await
            .context("Failed to initialize the sync engine")?;
        info!(
            sync_folder = %self.config.sync_folder.display(),
            database = %self.config.database_path.display(),
            "Engine initialized"
        );

        match self.engine.start_sync().await {
            Ok(()) => info!(
                interval_secs = self.config.sync_interval_seconds,
                watch = self.config.watch_filesystem,
                "Synchronization started"
            ),
            Err(e) if e.kind == ApiErrorKind::AuthFailed => {
                warn!(error = %e, "No usable session. Log in from an OxiSync app, then restart oxisyncd.");
            }
            Err(e) => return Err(e).context("Failed to start synchronization"),
        }

        self.shutdown.cancelled().await;
        info!("Shutdown signal received");

        if let Err(e) = self.engine.shutdown().await {
            error!(error = %e, "Engine shutdown failed");
        }
        drop(self.engine);
        if let Err(e) = self.service_task.await {
            error!(error = %e, "Engine service task ended abnormally");
        }
        Ok(())
    }
}

fn build_collaborators() -> Result<Collaborators> {
    let remote = WebDavClient::new().context("Failed to build the WebDAV client")?;
    let auth_provider = HttpAuthProvider::new().context("Failed to build the auth client")?;
    Ok(Collaborators {
        remote: Arc::new(remote),
        auth_provider: Arc::new(auth_provider),
        store_factory: Arc::new(SqliteStoreFactory),
        fs: Arc::new(LocalFileSystemAdapter::new()),
        network: Arc::new(SharedNetworkStatus::default()),
    })
}

/// A missing file means defaults; an unreadable one is an error.
fn load_config(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    SyncConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

// ============================================================================
// Graceful shutdown
// ============================================================================

/// Waits for SIGTERM or SIGINT and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path();
    let config = load_config(&config_path)?;
    init_tracing(&cli, &config);

    info!(config_path = %config_path.display(), "OxiSync daemon starting (oxisyncd)");

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown_token.clone()));

    let result = DaemonService::new(config, shutdown_token)?.run().await;

    match &result {
        Ok(()) => info!("OxiSync daemon shut down gracefully"),
        Err(e) => {
            let err_msg = format!("{e:#}");
            error!(error = %err_msg, "OxiSync daemon exiting with error");
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
