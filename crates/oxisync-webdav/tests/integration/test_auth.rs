//! Login, refresh and server-info tests

use oxisync_core::domain::{AuthCredentials, AuthError, DEFAULT_QUOTA_BYTES};
use oxisync_core::ports::IAuthProvider;
use oxisync_webdav::HttpAuthProvider;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(serde_json::json!({
            "username": "alice",
            "password": "secret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "user_id": "user-42",
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_at": 4_102_444_800_i64
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_reads_server_info() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/server/info"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "0.4.2",
            "name": "OxiCloud Test",
            "quota_total": 1000,
            "quota_used": 250,
            "supports_delta_sync": true
        })))
        .mount(&server)
        .await;

    let provider = HttpAuthProvider::new().unwrap();
    let session = provider
        .login(&AuthCredentials::new(server.uri(), "alice", "secret"))
        .await
        .expect("login");

    assert_eq!(session.user_id, "user-42");
    assert_eq!(session.username, "alice");
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(session.expires_at.unwrap().timestamp(), 4_102_444_800);
    assert_eq!(session.server_info.url, server.uri());
    assert_eq!(session.server_info.version, "0.4.2");
    assert!(session.server_info.supports_delta_sync);
    assert!(session.server_info.supports_chunked_upload);
    assert_eq!(
        session.webdav_url(),
        format!("{}/dav/files/alice", server.uri())
    );
}

#[tokio::test]
async fn test_login_falls_back_without_server_info() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    let provider = HttpAuthProvider::new().unwrap();
    let session = provider
        .login(&AuthCredentials::new(server.uri(), "alice", "secret"))
        .await
        .expect("login");

    assert_eq!(session.server_info.version, "unknown");
    assert_eq!(session.server_info.quota_total, DEFAULT_QUOTA_BYTES);
    assert!(!session.server_info.supports_delta_sync);
}

#[tokio::test]
async fn test_login_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider = HttpAuthProvider::new().unwrap();
    let err = provider
        .login(&AuthCredentials::new(server.uri(), "alice", "wrong"))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_login_validates_before_sending() {
    let provider = HttpAuthProvider::new().unwrap();
    let err = provider
        .login(&AuthCredentials::new("ftp://example.com", "alice", "pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidServerUrl(_)));
}

#[tokio::test]
async fn test_refresh_uses_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(header("Authorization", "Bearer test-refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpAuthProvider::new().unwrap();
    let session = common::session_for(&server, false, true);
    let refreshed = provider.refresh(&session).await.expect("refresh");

    assert_eq!(refreshed.access_token, "access-2");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("test-refresh-token"));
    assert!(refreshed.expires_at.is_none());
}

#[tokio::test]
async fn test_refresh_without_token_fails() {
    let server = MockServer::start().await;
    let provider = HttpAuthProvider::new().unwrap();
    let mut session = common::session_for(&server, false, true);
    session.refresh_token = None;

    assert!(matches!(
        provider.refresh(&session).await,
        Err(AuthError::RefreshFailed(_))
    ));
}

#[tokio::test]
async fn test_refresh_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider = HttpAuthProvider::new().unwrap();
    let session = common::session_for(&server, false, true);
    assert!(matches!(
        provider.refresh(&session).await,
        Err(AuthError::RefreshFailed(_))
    ));
}
