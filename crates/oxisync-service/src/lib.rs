//! OxiSync Service - The boundary hosts talk to
//!
//! A host (desktop shell, mobile bridge, the `oxisyncd` daemon) drives the
//! engine through an [`EngineHandle`]. Each operation is a [`Request`]
//! carrying a one-shot reply channel; the [`EngineService`] task answers it
//! against the [`EngineContext`] created by `initialize`.
//!
//! ## Usage
//!
//! ```no_run
//! # use oxisync_service::{Collaborators, EngineService};
//! # async fn example(collaborators: Collaborators, config: oxisync_core::config::SyncConfig) -> Result<(), oxisync_service::ApiError> {
//! let (engine, _task) = EngineService::spawn(collaborators);
//! engine.initialize(config).await?;
//! engine.login("https://cloud.example.com", "alice", "secret").await?;
//! engine.start_sync().await?;
//! let status = engine.get_sync_status().await?;
//! println!("{}", status.state);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod request;
pub mod service;

pub use context::{Collaborators, EngineContext};
pub use error::{ApiError, ApiErrorKind};
pub use request::{Reply, Request};
pub use service::{EngineHandle, EngineService};
