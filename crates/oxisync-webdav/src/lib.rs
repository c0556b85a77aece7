//! OxiSync WebDAV - OxiCloud server adapters
//!
//! Implements the remote-facing ports of `oxisync-core`:
//!
//! - [`WebDavClient`] - `IRemoteStorage` over WebDAV (`PROPFIND`, `GET` with
//!   ranges, `PUT`, `MKCOL`, `MOVE`, `DELETE`), with chunked and partial
//!   (delta) uploads when the server advertises them
//! - [`HttpAuthProvider`] - `IAuthProvider` over the OxiCloud REST endpoints
//!   (`/api/auth/login`, `/api/auth/refresh`, `/api/server/info`)
//!
//! Every request carries a 30 second timeout; timeouts surface as
//! `RemoteError::Timeout` so callers can retry them.

pub mod auth;
pub mod client;
pub mod multistatus;
mod status;
mod upload;

pub use auth::HttpAuthProvider;
pub use client::WebDavClient;

use std::time::Duration;

/// Timeout applied to every HTTP request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the shared HTTP client used by both adapters
pub(crate) fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("oxisync/", env!("CARGO_PKG_VERSION")))
        .build()
}
