//! Listing and metadata tests

use oxisync_core::domain::RemoteError;
use oxisync_core::ports::IRemoteStorage;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, dir, file};

#[tokio::test]
async fn test_list_directory_excludes_self_and_sorts() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    common::mount_propfind(
        &server,
        "docs",
        &[
            dir("docs", "d0"),
            file("docs/z.txt", 5, "e-z"),
            dir("docs/sub", "d1"),
            file("docs/a.txt", 3, "e-a"),
        ],
    )
    .await;

    let entries = client.list_directory("docs").await.expect("list");
    let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["docs/a.txt", "docs/sub", "docs/z.txt"]);

    let a = &entries[0];
    assert!(!a.is_directory);
    assert_eq!(a.size, 3);
    assert_eq!(a.etag.as_deref(), Some("e-a"));
    assert!(entries[1].is_directory);
}

#[tokio::test]
async fn test_propfind_sends_depth_and_token() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PROPFIND"))
        .and(path(common::dav_path("")))
        .and(header("Depth", "1"))
        .and(header("Authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(207).set_body_string(common::multistatus(&[dir(
            "", "root",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client.list_directory("").await.expect("list root");
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_list_tree_walks_subdirectories() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    common::mount_propfind(&server, "", &[dir("", "r"), dir("a", "d"), file("top.txt", 1, "t")])
        .await;
    common::mount_propfind(&server, "a", &[dir("a", "d"), file("a/inner.txt", 2, "i")]).await;

    let tree = client.list_tree().await.expect("tree");
    let paths: Vec<_> = tree.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["a", "a/inner.txt", "top.txt"]);
}

#[tokio::test]
async fn test_stat_missing_is_none() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PROPFIND"))
        .and(path(common::dav_path("gone.txt")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(client.stat("gone.txt").await.expect("stat").is_none());
}

#[tokio::test]
async fn test_stat_returns_entry() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    common::mount_propfind(&server, "f.bin", &[file("f.bin", 42, "etag-f")]).await;

    let entry = client.stat("f.bin").await.expect("stat").expect("exists");
    assert_eq!(entry.path, "f.bin");
    assert_eq!(entry.size, 42);
    assert_eq!(entry.etag.as_deref(), Some("etag-f"));
}

#[tokio::test]
async fn test_unauthorized_maps_to_unauthorized() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert_eq!(
        client.list_directory("").await.unwrap_err(),
        RemoteError::Unauthorized
    );
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.list_directory("").await.unwrap_err();
    assert!(matches!(err, RemoteError::Server { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_clear_unconfigures() {
    let (_server, client) = common::setup_dav_mock(false, true).await;
    client.clear().await;
    assert_eq!(
        client.stat("x").await.unwrap_err(),
        RemoteError::NotConfigured
    );
}
