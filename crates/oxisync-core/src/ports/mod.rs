//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! engine. The engine crates depend on these traits; the implementations
//! live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStorage`] - WebDAV-style remote tree: listing, ranged reads, upload sessions
//! - [`IAuthProvider`] - Login, token refresh and server capability discovery
//! - [`IStateStore`] - Durable baselines, conflicts, history, session and config
//! - [`ILocalFileSystem`] - Scanning, hashing, staged writes and atomic commits
//! - [`INetworkMonitor`] - Current network kind and metering as reported by the host

pub mod auth_provider;
pub mod local_filesystem;
pub mod network_monitor;
pub mod remote_storage;
pub mod state_store;

pub use auth_provider::IAuthProvider;
pub use local_filesystem::{ILocalFileSystem, StagedFile};
pub use network_monitor::{INetworkMonitor, NetworkKind, NetworkStatus};
pub use remote_storage::{IRemoteStorage, RemoteSignature, UploadMode, UploadSession};
pub use state_store::{IStateStore, IStateStoreFactory};
