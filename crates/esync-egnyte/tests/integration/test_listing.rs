//! Listing and metadata against a mocked Egnyte domain

use std::sync::Arc;
use std::time::Duration;

use esync_core::ports::{IFileStore, StoreError};
use futures_util::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, file_entry, folder_entry};

#[tokio::test]
async fn test_list_pages_by_offset() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/Finance"))
        .and(query_param("list_content", "true"))
        .and(query_param("offset", "0"))
        .and(query_param("count", "2"))
        .and(header("Authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Finance",
            "is_folder": true,
            "total_count": 3,
            "folders": [folder_entry("2023")],
            "files": [file_entry("budget.xlsx", 4096, "Sun, 26 Aug 2012 03:55:29 GMT")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/Finance"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Finance",
            "is_folder": true,
            "total_count": 3,
            "files": [file_entry("notes.txt", 12, "Mon, 27 Aug 2012 10:00:00 GMT")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let finance = common::path("/Shared/Finance");
    let records: Vec<_> = store.list(&finance).try_collect().await.unwrap();

    let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/Shared/Finance/2023",
            "/Shared/Finance/budget.xlsx",
            "/Shared/Finance/notes.txt"
        ]
    );
    assert!(records[0].is_folder);
    assert_eq!(records[1].size_bytes, 4096);
    assert_eq!(
        records[1].checksum.as_ref().map(|c| c.algorithm.as_str()),
        Some("sha512")
    );
}

#[tokio::test]
async fn test_list_missing_folder_is_not_found() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/Gone"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"errorMessage": "Folder not found"})),
        )
        .mount(&server)
        .await;

    let gone = common::path("/Shared/Gone");
    let result: Result<Vec<_>, _> = store.list(&gone).try_collect().await;
    assert_eq!(
        result.unwrap_err(),
        StoreError::NotFound("Folder not found".to_string())
    );
}

#[tokio::test]
async fn test_get_file_metadata() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_entry(
            "a.txt",
            3,
            "Sun, 26 Aug 2012 03:55:29 GMT",
        )))
        .mount(&server)
        .await;

    let record = store.get(&common::path("/Shared/a.txt")).await.unwrap();
    assert_eq!(record.size_bytes, 3);
    assert_eq!(record.last_modified.to_rfc3339(), "2012-08-26T03:55:29+00:00");
}

#[tokio::test]
async fn test_over_qps_is_throttling() {
    let (server, store) = common::setup_store().await;
    let observer = Arc::new(common::RecordingObserver::default());
    let store = store.with_throttle_observer(observer.clone());

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/a.txt"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("X-Mashery-Error-Code", "ERR_403_DEVELOPER_OVER_QPS")
                .insert_header("Retry-After", "0"),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pubapi/v1/fs/Shared/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_entry(
            "a.txt",
            3,
            "Sun, 26 Aug 2012 03:55:29 GMT",
        )))
        .expect(1)
        .mount(&server)
        .await;

    assert!(store.get(&common::path("/Shared/a.txt")).await.is_ok());
    assert_eq!(observer.waits(), vec![Some(Duration::ZERO)]);
}

#[tokio::test]
async fn test_daily_quota_returned_to_caller() {
    let (server, store) = common::setup_store().await;
    let observer = Arc::new(common::RecordingObserver::default());
    let store = store.with_throttle_observer(observer.clone());

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("X-Mashery-Error-Code", "ERR_403_DEVELOPER_OVER_RATE")
                .insert_header("Retry-After", "3600"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = store.get(&common::path("/Shared/a.txt")).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::RateLimited {
            retry_after: Some(Duration::from_secs(3600))
        }
    );
    // Returned to the caller, so not reported as absorbed
    assert!(observer.waits().is_empty());
}

#[tokio::test]
async fn test_plain_forbidden_is_permanent() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"errorMessage": "Access denied"})),
        )
        .mount(&server)
        .await;

    let err = store.get(&common::path("/Private/x.pdf")).await.unwrap_err();
    assert_eq!(err, StoreError::Forbidden("Access denied".to_string()));
    assert!(!err.is_transient());
}
