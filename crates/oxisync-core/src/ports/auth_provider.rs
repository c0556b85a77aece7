//! Authentication port (driven/secondary port)
//!
//! ## Design Notes
//!
//! - Returns [`AuthError`] rather than `anyhow` because the gateway maps each
//!   variant to a distinct host-visible failure.
//! - Implementations are stateless; the resulting session is owned and
//!   persisted by the caller.

use crate::domain::{AuthCredentials, AuthError, AuthSession, ServerInfo};

/// Server-side authentication endpoints
#[async_trait::async_trait]
pub trait IAuthProvider: Send + Sync {
    /// Exchanges credentials for a session, including the server's capabilities.
    async fn login(&self, credentials: &AuthCredentials) -> Result<AuthSession, AuthError>;

    /// Obtains a fresh access token for `session`.
    ///
    /// Fails with [`AuthError::RefreshFailed`] when the session carries no
    /// refresh token or the server rejects it.
    async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, AuthError>;

    /// Reads capabilities and quota with an existing access token.
    async fn fetch_server_info(
        &self,
        server_url: &str,
        access_token: &str,
    ) -> Result<ServerInfo, AuthError>;
}
