//! Ranged reads, chunked uploads and deletes against a mocked Egnyte domain

use chrono::{DateTime, Utc};
use esync_core::domain::{UploadRequest, UploadSession};
use esync_core::ports::{ByteRange, DeleteOutcome, IFileStore, StoreError};
use futures_util::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{body_bytes, header, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, file_entry};

fn request(p: &str, size: u64) -> UploadRequest {
    let modified: DateTime<Utc> = "2024-02-01T08:30:00Z".parse().unwrap();
    UploadRequest {
        path: common::path(p),
        total_size: size,
        last_modified: Some(modified),
    }
}

#[tokio::test]
async fn test_ranged_read() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs-content/Shared/a.txt"))
        .and(header("Range", "bytes=3-6"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"defg".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let chunks: Vec<Vec<u8>> = store
        .open_read(&common::path("/Shared/a.txt"), ByteRange::new(3, 7))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), b"defg");
}

#[tokio::test]
async fn test_chunked_upload_carries_upload_id() {
    let (server, store) = common::setup_store().await;
    let chunked = "/pubapi/v1/fs-content-chunked/Shared/Reports/q1.bin";

    Mock::given(method("POST"))
        .and(path(chunked))
        .and(header("X-Egnyte-Chunk-Num", "1"))
        .and(body_bytes(b"aaaa".to_vec()))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Egnyte-Upload-Id", "up-1"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(chunked))
        .and(header("X-Egnyte-Chunk-Num", "2"))
        .and(header("X-Egnyte-Upload-Id", "up-1"))
        .and(body_bytes(b"bbbb".to_vec()))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Egnyte-Upload-Id", "up-1"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(chunked))
        .and(header("X-Egnyte-Chunk-Num", "3"))
        .and(header("X-Egnyte-Upload-Id", "up-1"))
        .and(header("X-Egnyte-Last-Chunk", "true"))
        .and(header_exists("Last-Modified"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"checksum": "00"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/Reports/q1.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_entry(
            "q1.bin",
            10,
            "Thu, 01 Feb 2024 08:30:00 GMT",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let session = store
        .begin_upload(&request("/Shared/Reports/q1.bin", 10))
        .await
        .unwrap();
    assert_eq!(store.open_uploads(), 1);

    let mut cursor = 0;
    for chunk in [b"aaaa".to_vec(), b"bbbb".to_vec(), b"cc".to_vec()] {
        cursor = store.upload_chunk(&session, cursor, chunk).await.unwrap();
    }
    assert_eq!(cursor, 10);

    let record = store.complete_upload(&session).await.unwrap();
    assert_eq!(record.size_bytes, 10);
    assert_eq!(record.last_modified.to_rfc3339(), "2024-02-01T08:30:00+00:00");
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn test_first_chunk_without_upload_id_is_invalid() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = store.begin_upload(&request("/Shared/x.bin", 10)).await.unwrap();
    let err = store
        .upload_chunk(&session, 0, vec![1; 4])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_forgotten_upload_is_expired() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("POST"))
        .and(header("X-Egnyte-Chunk-Num", "1"))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Egnyte-Upload-Id", "up-9"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("X-Egnyte-Chunk-Num", "2"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"errorMessage": "Upload not found"})),
        )
        .mount(&server)
        .await;

    let session = store.begin_upload(&request("/Shared/x.bin", 10)).await.unwrap();
    let cursor = store.upload_chunk(&session, 0, vec![1; 4]).await.unwrap();
    let err = store
        .upload_chunk(&session, cursor, vec![2; 4])
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::SessionExpired("Upload not found".to_string()));
}

#[tokio::test]
async fn test_unknown_session_and_wrong_offset() {
    let (_server, store) = common::setup_store().await;

    let stranger = UploadSession {
        handle: "egnyte-upload-999".to_string(),
        path: common::path("/Shared/x.bin"),
        total_size: 10,
        expires_at: None,
    };
    assert!(matches!(
        store.upload_chunk(&stranger, 0, vec![0; 4]).await,
        Err(StoreError::SessionExpired(_))
    ));

    let session = store.begin_upload(&request("/Shared/x.bin", 10)).await.unwrap();
    assert!(matches!(
        store.upload_chunk(&session, 4, vec![0; 4]).await,
        Err(StoreError::Rejected { status: 416, .. })
    ));
    assert!(matches!(
        store.complete_upload(&session).await,
        Err(StoreError::Rejected { status: 409, .. })
    ));

    store.abort_upload(&session).await.unwrap();
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn test_zero_byte_file_uses_single_upload() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("POST"))
        .and(path("/pubapi/v1/fs-content/Shared/empty.txt"))
        .and(header_exists("Last-Modified"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"checksum": "cf83"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/empty.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_entry(
            "empty.txt",
            0,
            "Thu, 01 Feb 2024 08:30:00 GMT",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let session = store.begin_upload(&request("/Shared/empty.txt", 0)).await.unwrap();
    let record = store.complete_upload(&session).await.unwrap();
    assert_eq!(record.size_bytes, 0);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("DELETE"))
        .and(path("/pubapi/v1/fs/Shared/old.txt"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/pubapi/v1/fs/Shared/old.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let old = common::path("/Shared/old.txt");
    assert_eq!(store.delete(&old).await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete(&old).await.unwrap(), DeleteOutcome::NotFound);
}
