//! Ranged reads, upload sessions and deletes against a mocked drive

use chrono::{DateTime, Utc};
use esync_core::domain::UploadRequest;
use esync_core::ports::{ByteRange, DeleteOutcome, IFileStore, StoreError};
use futures_util::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, file_item, graph_error, item_path};

fn modified() -> DateTime<Utc> {
    "2024-02-01T08:30:00Z".parse().unwrap()
}

async fn read_all(store: &impl IFileStore, p: &str, range: ByteRange) -> Vec<u8> {
    let chunks: Vec<Vec<u8>> = store
        .open_read(&common::path(p), range)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    chunks.concat()
}

async fn mount_session(server: &MockServer, p: &str) -> String {
    let upload_url = format!("{}/upload/session-1", server.uri());
    Mock::given(method("POST"))
        .and(path(item_path(p, Some("createUploadSession"))))
        .and(body_partial_json(json!({
            "item": {
                "@microsoft.graph.conflictBehavior": "replace",
                "fileSystemInfo": { "lastModifiedDateTime": "2024-02-01T08:30:00Z" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": upload_url,
            "expirationDateTime": "2099-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(server)
        .await;
    upload_url
}

#[tokio::test]
async fn test_ranged_read() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path(item_path("/Docs/a.txt", Some("content"))))
        .and(header("Range", "bytes=2-5"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"cdef".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let data = read_all(&store, "/Docs/a.txt", ByteRange::new(2, 6)).await;
    assert_eq!(data, b"cdef");
}

#[tokio::test]
async fn test_full_body_is_cut_to_range() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path(item_path("/a.txt", Some("content"))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abcdefgh".to_vec()))
        .mount(&server)
        .await;

    let data = read_all(&store, "/a.txt", ByteRange::new(0, 4)).await;
    assert_eq!(data, b"abcd");

    // A full body cannot serve a range that starts later in the file
    let err = store
        .open_read(&common::path("/a.txt"), ByteRange::new(4, 8))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_chunked_upload_session() {
    let (server, store) = common::setup_store().await;
    mount_session(&server, "/Docs/report.bin").await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .and(header("Content-Range", "bytes 0-3/10"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "expirationDateTime": "2099-01-01T00:00:00Z",
            "nextExpectedRanges": ["4-"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .and(header("Content-Range", "bytes 4-9/10"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(file_item("report.bin", 10, "2024-02-01T08:30:00Z")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = UploadRequest {
        path: common::path("/Docs/report.bin"),
        total_size: 10,
        last_modified: Some(modified()),
    };
    let session = store.begin_upload(&request).await.unwrap();
    assert!(session.handle.ends_with("/upload/session-1"));
    assert!(session.expires_at.is_some());

    let cursor = store
        .upload_chunk(&session, 0, b"0123".to_vec())
        .await
        .unwrap();
    assert_eq!(cursor, 4);
    let cursor = store
        .upload_chunk(&session, cursor, b"456789".to_vec())
        .await
        .unwrap();
    assert_eq!(cursor, 10);

    let record = store.complete_upload(&session).await.unwrap();
    assert_eq!(record.path.as_str(), "/Docs/report.bin");
    assert_eq!(record.size_bytes, 10);
    assert_eq!(record.last_modified, modified());

    // The final item is handed out once
    assert!(store.complete_upload(&session).await.is_err());
}

#[tokio::test]
async fn test_missing_session_is_expired() {
    let (server, store) = common::setup_store().await;
    mount_session(&server, "/big.bin").await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(graph_error("itemNotFound", "gone")),
        )
        .mount(&server)
        .await;

    let request = UploadRequest {
        path: common::path("/big.bin"),
        total_size: 100,
        last_modified: Some(modified()),
    };
    let session = store.begin_upload(&request).await.unwrap();
    let err = store
        .upload_chunk(&session, 0, vec![0; 10])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionExpired(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_abort_deletes_session() {
    let (server, store) = common::setup_store().await;
    mount_session(&server, "/big.bin").await;

    Mock::given(method("DELETE"))
        .and(path("/upload/session-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = UploadRequest {
        path: common::path("/big.bin"),
        total_size: 100,
        last_modified: Some(modified()),
    };
    let session = store.begin_upload(&request).await.unwrap();
    store.abort_upload(&session).await.unwrap();
}

#[tokio::test]
async fn test_zero_byte_file_uses_simple_put() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(item_path("/Docs/empty.txt", Some("content"))))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(file_item("empty.txt", 0, "2024-06-01T00:00:00Z")),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(item_path("/Docs/empty.txt", None)))
        .and(body_partial_json(json!({
            "fileSystemInfo": { "lastModifiedDateTime": "2024-02-01T08:30:00Z" }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(file_item("empty.txt", 0, "2024-02-01T08:30:00Z")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = UploadRequest {
        path: common::path("/Docs/empty.txt"),
        total_size: 0,
        last_modified: Some(modified()),
    };
    let session = store.begin_upload(&request).await.unwrap();
    assert!(session.handle.starts_with("inline:"));

    let record = store.complete_upload(&session).await.unwrap();
    assert_eq!(record.size_bytes, 0);
    assert_eq!(record.last_modified, modified());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("DELETE"))
        .and(path(item_path("/old.txt", None)))
        .respond_with(ResponseTemplate::new(204))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(item_path("/old.txt", None)))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(graph_error("itemNotFound", "gone")),
        )
        .mount(&server)
        .await;

    let old = common::path("/old.txt");
    assert_eq!(store.delete(&old).await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete(&old).await.unwrap(), DeleteOutcome::NotFound);
}
