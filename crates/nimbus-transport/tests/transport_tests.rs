//! Integration tests for the REST cloud transport
//!
//! Runs [`HttpCloudTransport`] against a wiremock server, covering the
//! endpoint mapping, the status-to-taxonomy translation, and the
//! streaming download path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nimbus_core::domain::{ChangeCursor, ItemKind, LocalPath, RemotePath, SyncError};
use nimbus_core::ports::ICloudTransport;
use nimbus_core::retry::is_retryable_error;
use nimbus_transport::{HttpCloudTransport, RestClient};

async fn transport_for(server: &MockServer) -> HttpCloudTransport {
    let client = RestClient::new(server.uri(), "test-token").expect("client");
    HttpCloudTransport::new(client)
}

fn file_body(remote_path: &str, size: u64) -> serde_json::Value {
    serde_json::json!({
        "path": remote_path,
        "name": remote_path.rsplit('/').next().unwrap(),
        "kind": "file",
        "size": size,
        "modifiedAt": "2026-01-15T10:00:00Z",
        "hash": "deadbeef"
    })
}

fn noop_progress() -> nimbus_core::ports::ProgressFn {
    Box::new(|_, _| {})
}

// ============================================================================
// Uploads and downloads
// ============================================================================

#[tokio::test]
async fn test_upload_sends_bytes_and_maps_response() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/files/docs/a.txt"))
        .respond_with(ResponseTemplate::new(201).set_body_json(file_body("/docs/a.txt", 7)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local_file = dir.path().join("a.txt");
    tokio::fs::write(&local_file, b"payload").await.unwrap();

    let transport = transport_for(&server).await;
    let item = transport
        .upload_file(
            &LocalPath::new(local_file).unwrap(),
            &RemotePath::new("/docs/a.txt").unwrap(),
            noop_progress(),
        )
        .await
        .expect("upload");

    assert_eq!(item.path.as_str(), "/docs/a.txt");
    assert_eq!(item.kind, ItemKind::File);
    assert_eq!(item.size_bytes, 7);
    assert_eq!(item.hash.unwrap().as_str(), "deadbeef");
}

#[tokio::test]
async fn test_upload_reports_progress_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/files/a.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_body("/a.bin", 5)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local_file = dir.path().join("a.bin");
    tokio::fs::write(&local_file, b"12345").await.unwrap();

    let last_seen = Arc::new(AtomicU64::new(u64::MAX));
    let progress = {
        let last_seen = last_seen.clone();
        Box::new(move |sent: u64, total: u64| {
            assert_eq!(total, 5);
            last_seen.store(sent, Ordering::SeqCst);
        })
    };

    let transport = transport_for(&server).await;
    transport
        .upload_file(
            &LocalPath::new(local_file).unwrap(),
            &RemotePath::new("/a.bin").unwrap(),
            progress,
        )
        .await
        .unwrap();

    // The final callback reports the full size
    assert_eq!(last_seen.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_download_streams_to_target_without_leftover_temp() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/big.bin/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xAB; 4096]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("big.bin");

    let transport = transport_for(&server).await;
    transport
        .download_file(
            &RemotePath::new("/big.bin").unwrap(),
            &LocalPath::new(target.clone()).unwrap(),
            noop_progress(),
        )
        .await
        .expect("download");

    let data = tokio::fs::read(&target).await.unwrap();
    assert_eq!(data.len(), 4096);
    assert!(data.iter().all(|b| *b == 0xAB));

    // The .partial staging file was renamed away
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names, vec!["big.bin".to_string()]);
}

// ============================================================================
// Metadata operations
// ============================================================================

#[tokio::test]
async fn test_move_item_posts_destination() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items/old.txt/move"))
        .and(body_json(serde_json::json!({"to": "/new.txt"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    transport
        .move_item(
            &RemotePath::new("/old.txt").unwrap(),
            &RemotePath::new("/new.txt").unwrap(),
        )
        .await
        .expect("move");
}

#[tokio::test]
async fn test_list_folder_maps_children() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/folders/docs/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                file_body("/docs/a.txt", 10),
                {
                    "path": "/docs/sub",
                    "name": "sub",
                    "kind": "folder",
                    "modifiedAt": "2026-01-15T10:00:00Z"
                }
            ]
        })))
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    let children = transport
        .list_folder(&RemotePath::new("/docs").unwrap())
        .await
        .expect("list");

    assert_eq!(children.len(), 2);
    assert_eq!(children[0].kind, ItemKind::File);
    assert_eq!(children[1].kind, ItemKind::Folder);
    assert_eq!(children[1].path.as_str(), "/docs/sub");
}

#[tokio::test]
async fn test_get_changes_passes_cursor_and_returns_next() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/changes"))
        .and(query_param("cursor", "c-41"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "changes": [
                { "item": file_body("/a.txt", 3), "deleted": false },
                { "item": file_body("/gone.txt", 0), "deleted": true }
            ],
            "cursor": "c-42"
        })))
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    let cursor = ChangeCursor::new("c-41").unwrap();
    let change_set = transport.get_changes(Some(&cursor)).await.expect("changes");

    assert_eq!(change_set.changes.len(), 2);
    assert!(!change_set.changes[0].deleted);
    assert!(change_set.changes[1].deleted);
    assert_eq!(change_set.next_cursor.as_str(), "c-42");
}

// ============================================================================
// Error taxonomy
// ============================================================================

#[tokio::test]
async fn test_missing_file_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/nope.txt"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such file"))
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    let err = transport
        .get_file_info(&RemotePath::new("/nope.txt").unwrap())
        .await
        .expect_err("404");

    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::NotFound(_))
    ));
    assert!(!is_retryable_error(&err));
}

#[tokio::test]
async fn test_existing_folder_maps_to_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/folders/docs"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    let err = transport
        .create_folder(&RemotePath::new("/docs").unwrap())
        .await
        .expect_err("409");

    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/files/a.txt"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    let err = transport
        .delete_file(&RemotePath::new("/a.txt").unwrap())
        .await
        .expect_err("503");

    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::ServerError(503))
    ));
    assert!(is_retryable_error(&err));
}

#[tokio::test]
async fn test_throttling_maps_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/changes"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "17"))
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    let err = transport.get_changes(None).await.expect_err("429");

    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::RateLimited)
    ));
    assert!(is_retryable_error(&err));
}

#[tokio::test]
async fn test_forbidden_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/files/a.txt"))
        .respond_with(ResponseTemplate::new(403).set_body_string("read-only share"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local_file = dir.path().join("a.txt");
    tokio::fs::write(&local_file, b"x").await.unwrap();

    let transport = transport_for(&server).await;
    let err = transport
        .upload_file(
            &LocalPath::new(local_file).unwrap(),
            &RemotePath::new("/a.txt").unwrap(),
            noop_progress(),
        )
        .await
        .expect_err("403");

    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::PermissionDenied(_))
    ));
    assert!(!is_retryable_error(&err));
}
