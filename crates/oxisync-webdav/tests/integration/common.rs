//! Shared helpers for the WebDAV integration tests
//!
//! Each helper mounts the endpoints a test needs and returns a client already
//! configured against the mock server.

use chrono::Utc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oxisync_core::domain::{AuthSession, ServerInfo};
use oxisync_core::ports::IRemoteStorage;
use oxisync_webdav::WebDavClient;

pub const USER: &str = "alice";

/// One `<d:response>` entry for [`multistatus`]
pub struct DavEntry<'a> {
    pub rel_path: &'a str,
    pub is_dir: bool,
    pub size: u64,
    pub etag: &'a str,
}

pub fn dir<'a>(rel_path: &'a str, etag: &'a str) -> DavEntry<'a> {
    DavEntry {
        rel_path,
        is_dir: true,
        size: 0,
        etag,
    }
}

pub fn file<'a>(rel_path: &'a str, size: u64, etag: &'a str) -> DavEntry<'a> {
    DavEntry {
        rel_path,
        is_dir: false,
        size,
        etag,
    }
}

/// Renders a multistatus body for the given entries
pub fn multistatus(entries: &[DavEntry<'_>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">"#,
    );
    for e in entries {
        let suffix = if e.is_dir && !e.rel_path.is_empty() { "/" } else { "" };
        let href = if e.rel_path.is_empty() {
            format!("/dav/files/{USER}/")
        } else {
            format!("/dav/files/{USER}/{}{suffix}", e.rel_path)
        };
        let resourcetype = if e.is_dir {
            "<d:resourcetype><d:collection/></d:resourcetype>"
        } else {
            "<d:resourcetype/>"
        };
        xml.push_str(&format!(
            "<d:response><d:href>{href}</d:href><d:propstat><d:prop>\
             {resourcetype}<d:getcontentlength>{}</d:getcontentlength>\
             <d:getlastmodified>Mon, 04 Mar 2024 12:00:00 GMT</d:getlastmodified>\
             <d:getetag>\"{}\"</d:getetag></d:prop>\
             <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            e.size, e.etag
        ));
    }
    xml.push_str("</d:multistatus>");
    xml
}

pub fn session_for(server: &MockServer, delta: bool, chunked: bool) -> AuthSession {
    let mut info = ServerInfo::fallback(&server.uri());
    info.supports_delta_sync = delta;
    info.supports_chunked_upload = chunked;
    AuthSession {
        user_id: "user-1".into(),
        username: USER.into(),
        access_token: "test-access-token".into(),
        refresh_token: Some("test-refresh-token".into()),
        expires_at: None,
        server_info: info,
        created_at: Utc::now(),
    }
}

/// Starts a mock server and a client configured against it
pub async fn setup_dav_mock(delta: bool, chunked: bool) -> (MockServer, WebDavClient) {
    let server = MockServer::start().await;
    let client = WebDavClient::new()
        .expect("client")
        .with_chunk_threshold(16);
    client
        .configure(&session_for(&server, delta, chunked))
        .await
        .expect("configure");
    (server, client)
}

/// Absolute request path of a file below the user's root
pub fn dav_path(rel: &str) -> String {
    format!("/dav/files/{USER}/{rel}")
}

/// Mounts a PROPFIND answer for `rel`
pub async fn mount_propfind(server: &MockServer, rel: &str, entries: &[DavEntry<'_>]) {
    Mock::given(method("PROPFIND"))
        .and(path(dav_path(rel)))
        .respond_with(
            ResponseTemplate::new(207)
                .insert_header("Content-Type", "application/xml; charset=utf-8")
                .set_body_string(multistatus(entries)),
        )
        .mount(server)
        .await;
}
