//! OxiSync Core - Domain model, configuration and ports
//!
//! This crate contains the hexagonal architecture core of the sync engine:
//! - **Domain types** - `SyncItem`, `SyncConflict`, `SyncHistoryEntry`, `AuthSession`,
//!   snapshot records and the change/action vocabulary shared by the engine crates
//! - **Configuration** - `SyncConfig` with YAML loading, validation and a builder
//! - **Ignore rules** - `IgnoreMatcher` compiled from the configured glob patterns
//! - **Port definitions** - Traits implemented by adapter crates: `IRemoteStorage`,
//!   `IAuthProvider`, `IStateStore`, `ILocalFileSystem`, `INetworkMonitor`
//!
//! # Architecture
//!
//! The domain module holds plain data and validation with no I/O.
//! Ports define the trait interfaces that the adapter crates (`oxisync-webdav`,
//! `oxisync-cache`, the filesystem adapter in `oxisync-sync`) implement.

pub mod config;
pub mod domain;
pub mod ignore;
pub mod ports;
