//! Authentication records

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::AuthError;
use super::server::ServerInfo;

/// Sessions are refreshed when they expire within this window
pub const REFRESH_WINDOW_MINUTES: i64 = 5;

/// Login input; the password is never serialized
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthCredentials {
    pub server_url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl AuthCredentials {
    pub fn new(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Checks that every field is present and the URL is http(s)
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.server_url.trim().is_empty() {
            return Err(AuthError::InvalidServerUrl("server URL is required".into()));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(AuthError::InvalidServerUrl(format!(
                "{} must start with http:// or https://",
                self.server_url
            )));
        }
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }

    /// Server URL without trailing slash
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// WebDAV root of the user's files: `{server}/dav/files/{username}`
    pub fn webdav_url(&self) -> String {
        format!("{}/dav/files/{}", self.base_url(), self.username)
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub server_info: ServerInfo,
    pub created_at: DateTime<Utc>,
}

impl AuthSession {
    /// Sessions without an expiry never expire
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    pub fn needs_refresh(&self) -> bool {
        self.expires_at
            .is_some_and(|at| Utc::now() >= at - Duration::minutes(REFRESH_WINDOW_MINUTES))
    }

    /// WebDAV root of the user's files
    pub fn webdav_url(&self) -> String {
        format!(
            "{}/dav/files/{}",
            self.server_info.url.trim_end_matches('/'),
            self.username
        )
    }
}

/// Outcome of a login returned to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    pub user_id: String,
    pub username: String,
    pub server_info: ServerInfo,
    pub access_token: String,
}

impl From<&AuthSession> for AuthResult {
    fn from(session: &AuthSession) -> Self {
        Self {
            success: true,
            user_id: session.user_id.clone(),
            username: session.username.clone(),
            server_info: session.server_info.clone(),
            access_token: session.access_token.clone(),
        }
    }
}
