//! Download, upload and tree mutation tests

use oxisync_core::domain::RemoteError;
use oxisync_core::ports::{IRemoteStorage, UploadMode};
use wiremock::matchers::{body_bytes, header, method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, file};

// ============================================================================
// Downloads
// ============================================================================

#[tokio::test]
async fn test_download_range_sends_range_header() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("GET"))
        .and(path(common::dav_path("data.bin")))
        .and(header("Range", "bytes=4-7"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"4567".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let data = client.download_range("data.bin", 4, 4).await.expect("range");
    assert_eq!(data, b"4567");
}

#[tokio::test]
async fn test_download_range_slices_full_response() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("GET"))
        .and(path(common::dav_path("data.bin")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
        .mount(&server)
        .await;

    let data = client.download_range("data.bin", 2, 3).await.expect("range");
    assert_eq!(data, b"234");
}

#[tokio::test]
async fn test_download_zero_length_sends_nothing() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    assert!(client.download_range("empty", 0, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_missing_file_is_not_found() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(matches!(
        client.download_range("nope", 0, 10).await,
        Err(RemoteError::NotFound(_))
    ));
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test]
async fn test_small_upload_is_one_put_on_commit() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PUT"))
        .and(path(common::dav_path("note.txt")))
        .and(header("If-Match", "\"old-etag\""))
        .and(body_bytes(b"hello world".to_vec()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    common::mount_propfind(&server, "note.txt", &[file("note.txt", 11, "new-etag")]).await;

    let session = client
        .begin_upload("note.txt", UploadMode::Full, 11, Some("old-etag"))
        .await
        .expect("begin");
    client
        .upload_chunk(&session, 6, b"world".to_vec())
        .await
        .unwrap();
    client
        .upload_chunk(&session, 0, b"hello ".to_vec())
        .await
        .unwrap();

    let entry = client.commit_upload(&session).await.expect("commit");
    assert_eq!(entry.etag.as_deref(), Some("new-etag"));
    assert_eq!(entry.size, 11);
    assert_eq!(client.open_uploads(), 0);
}

#[tokio::test]
async fn test_abort_before_commit_sends_nothing() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let session = client
        .begin_upload("draft.txt", UploadMode::Full, 4, None)
        .await
        .unwrap();
    client.upload_chunk(&session, 0, b"half".to_vec()).await.unwrap();
    client.abort_upload(&session).await.unwrap();
    assert_eq!(client.open_uploads(), 0);
}

#[tokio::test]
async fn test_changed_remote_fails_precondition() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;

    let session = client
        .begin_upload("a.txt", UploadMode::Full, 1, Some("stale"))
        .await
        .unwrap();
    client.upload_chunk(&session, 0, b"x".to_vec()).await.unwrap();
    assert!(matches!(
        client.commit_upload(&session).await,
        Err(RemoteError::PreconditionFailed(_))
    ));
}

#[tokio::test]
async fn test_quota_exceeded() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(507))
        .mount(&server)
        .await;

    let session = client
        .begin_upload("big.iso", UploadMode::Full, 2, None)
        .await
        .unwrap();
    client.upload_chunk(&session, 0, b"xx".to_vec()).await.unwrap();
    assert_eq!(
        client.commit_upload(&session).await.unwrap_err(),
        RemoteError::QuotaExceeded
    );
}

#[tokio::test]
async fn test_large_upload_uses_chunk_collection() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("MKCOL"))
        .and(path_regex(r"^/dav/uploads/alice/[0-9a-f]{32}$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/dav/uploads/alice/[0-9a-f]{32}/[0-9]{20}$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("MOVE"))
        .and(path_regex(r"^/dav/uploads/alice/[0-9a-f]{32}/\.file$"))
        .and(header("OC-Total-Length", "32"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    common::mount_propfind(&server, "video.mp4", &[file("video.mp4", 32, "v1")]).await;

    let session = client
        .begin_upload("video.mp4", UploadMode::Full, 32, None)
        .await
        .expect("begin");
    client.upload_chunk(&session, 0, vec![1; 16]).await.unwrap();
    client.upload_chunk(&session, 16, vec![2; 16]).await.unwrap();
    let entry = client.commit_upload(&session).await.expect("commit");
    assert_eq!(entry.etag.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_delta_upload_requires_server_support() {
    let (_server, client) = common::setup_dav_mock(false, true).await;
    assert!(matches!(
        client.begin_upload("a", UploadMode::Delta, 10, Some("e")).await,
        Err(RemoteError::Unsupported(_))
    ));
}

#[tokio::test]
async fn test_delta_upload_patches_ranges() {
    let (server, client) = common::setup_dav_mock(true, true).await;
    Mock::given(method("PATCH"))
        .and(path(common::dav_path("db.sqlite")))
        .and(header("X-Update-Range", "bytes=8-11"))
        .and(header("If-Match", "\"base\""))
        .and(body_bytes(b"WXYZ".to_vec()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    common::mount_propfind(&server, "db.sqlite", &[file("db.sqlite", 12, "patched")]).await;

    let session = client
        .begin_upload("db.sqlite", UploadMode::Delta, 12, Some("base"))
        .await
        .unwrap();
    client.upload_chunk(&session, 8, b"WXYZ".to_vec()).await.unwrap();
    let entry = client.commit_upload(&session).await.expect("commit");
    assert_eq!(entry.etag.as_deref(), Some("patched"));
}

#[tokio::test]
async fn test_signature_endpoint() {
    let (server, client) = common::setup_dav_mock(true, true).await;
    Mock::given(method("GET"))
        .and(path("/api/sync/signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "size": 8,
            "block_size": 4,
            "blocks": ["aa", "bb"]
        })))
        .mount(&server)
        .await;

    let sig = client.signature("db.sqlite", 4).await.expect("signature");
    assert_eq!(sig.blocks, vec!["aa".to_string(), "bb".to_string()]);
    assert_eq!(sig.size, 8);
}

// ============================================================================
// Tree mutations
// ============================================================================

#[tokio::test]
async fn test_mkcol_existing_is_ok() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("MKCOL"))
        .and(path(common::dav_path("Photos")))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    client.create_directory("Photos").await.expect("mkcol");
}

#[tokio::test]
async fn test_delete_missing_is_ok() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    client.delete("already/gone.txt").await.expect("delete");
}

#[tokio::test]
async fn test_move_does_not_overwrite() {
    let (server, client) = common::setup_dav_mock(false, true).await;
    let destination = format!("{}{}", server.uri(), common::dav_path("new.txt"));
    Mock::given(method("MOVE"))
        .and(path(common::dav_path("old.txt")))
        .and(header("Destination", destination.as_str()))
        .and(header("Overwrite", "F"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client.move_item("old.txt", "new.txt").await.expect("move");
}
