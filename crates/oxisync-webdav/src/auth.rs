//! HTTP authentication against the OxiCloud REST API
//!
//! - `POST {server}/api/auth/login` with `{username, password}`
//! - `POST {server}/api/auth/refresh` with the refresh token as bearer
//! - `GET {server}/api/server/info` with the access token as bearer
//!
//! Expiry timestamps arrive as Unix seconds.

use chrono::{DateTime, Utc};
use oxisync_core::domain::{AuthCredentials, AuthError, AuthSession, ServerInfo};
use oxisync_core::ports::IAuthProvider;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

// ============================================================================
// API request/response types
// ============================================================================

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user_id: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ServerInfoResponse {
    version: String,
    name: String,
    webdav_url: Option<String>,
    quota_total: u64,
    quota_used: u64,
    supports_delta_sync: Option<bool>,
    supports_chunked_upload: Option<bool>,
}

impl ServerInfoResponse {
    fn into_server_info(self, server_url: &str) -> ServerInfo {
        ServerInfo {
            url: server_url.to_string(),
            version: self.version,
            name: self.name,
            webdav_url: self
                .webdav_url
                .unwrap_or_else(|| format!("{server_url}/dav")),
            quota_total: self.quota_total,
            quota_used: self.quota_used,
            supports_delta_sync: self.supports_delta_sync.unwrap_or(false),
            supports_chunked_upload: self.supports_chunked_upload.unwrap_or(true),
        }
    }
}

fn from_unix(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn network_error(err: reqwest::Error) -> AuthError {
    AuthError::Network(err.to_string())
}

// ============================================================================
// HttpAuthProvider
// ============================================================================

/// [`IAuthProvider`] for OxiCloud servers
pub struct HttpAuthProvider {
    client: Client,
}

impl HttpAuthProvider {
    pub fn new() -> Result<Self, AuthError> {
        let client = crate::http_client().map_err(network_error)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl IAuthProvider for HttpAuthProvider {
    #[instrument(skip(self, credentials), fields(server = %credentials.server_url, user = %credentials.username))]
    async fn login(&self, credentials: &AuthCredentials) -> Result<AuthSession, AuthError> {
        credentials.validate()?;
        let base = credentials.base_url();

        let response = self
            .client
            .post(format!("{base}/api/auth/login"))
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::BAD_REQUEST
        {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Network(format!("login returned {status}")));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid login response: {e}")))?;

        let server_info = self.fetch_server_info(base, &login.access_token).await?;

        info!(user_id = %login.user_id, "Logged in");
        Ok(AuthSession {
            user_id: login.user_id,
            username: credentials.username.clone(),
            access_token: login.access_token,
            refresh_token: login.refresh_token,
            expires_at: from_unix(login.expires_at),
            server_info,
            created_at: Utc::now(),
        })
    }

    #[instrument(skip(self, session), fields(user = %session.username))]
    async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, AuthError> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token".into()))?;

        let response = self
            .client
            .post(format!(
                "{}/api/auth/refresh",
                session.server_info.url.trim_end_matches('/')
            ))
            .bearer_auth(refresh_token)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::RefreshFailed(format!("server returned {status}")));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("invalid refresh response: {e}")))?;

        let mut updated = session.clone();
        updated.access_token = refreshed.access_token;
        if let Some(token) = refreshed.refresh_token {
            updated.refresh_token = Some(token);
        }
        updated.expires_at = from_unix(refreshed.expires_at);

        debug!(expires_at = ?updated.expires_at, "Access token refreshed");
        Ok(updated)
    }

    async fn fetch_server_info(
        &self,
        server_url: &str,
        access_token: &str,
    ) -> Result<ServerInfo, AuthError> {
        let base = server_url.trim_end_matches('/');
        let response = self
            .client
            .get(format!("{base}/api/server/info"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Server info unavailable, using defaults");
            return Ok(ServerInfo::fallback(base));
        }

        let info: ServerInfoResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid server info: {e}")))?;
        Ok(info.into_server_info(base))
    }
}
