//! Listing and metadata against a mocked drive

use std::sync::Arc;
use std::time::Duration;

use esync_core::ports::{IFileStore, StoreError};
use futures_util::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, file_item, folder_item, graph_error, item_path};

#[tokio::test]
async fn test_list_follows_next_link() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path(item_path("/Docs", Some("children"))))
        .and(query_param("$top", "2"))
        .and(header("Authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                file_item("a.txt", 5, "2024-01-01T00:00:00Z"),
                folder_item("Sub"),
            ],
            "@odata.nextLink": format!(
                "{}/drives/{}/items/docs/children?$skiptoken=p2",
                server.uri(),
                common::DRIVE_ID
            )
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/drives/{}/items/docs/children", common::DRIVE_ID)))
        .and(query_param("$skiptoken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [file_item("b.txt", 7, "2024-01-02T00:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let docs = common::path("/Docs");
    let records: Vec<_> = store.list(&docs).try_collect().await.unwrap();

    let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/Docs/a.txt", "/Docs/Sub", "/Docs/b.txt"]);
    assert!(records[1].is_folder);
    assert_eq!(records[2].size_bytes, 7);
    assert_eq!(
        records[0].last_modified.to_rfc3339(),
        "2024-01-01T00:00:00+00:00"
    );
    assert_eq!(
        records[0].checksum.as_ref().map(|c| c.algorithm.as_str()),
        Some("quickxorhash")
    );
}

#[tokio::test]
async fn test_list_root_uses_root_children() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path(format!("/drives/{}/root/children", common::DRIVE_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [folder_item("Shared Documents")]
        })))
        .mount(&server)
        .await;

    let root = esync_core::domain::RemotePath::root();
    let records: Vec<_> = store.list(&root).try_collect().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path.as_str(), "/Shared Documents");
}

#[tokio::test]
async fn test_list_missing_folder_is_not_found() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path(item_path("/Missing", Some("children"))))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(graph_error("itemNotFound", "The resource could not be found.")),
        )
        .mount(&server)
        .await;

    let missing = common::path("/Missing");
    let result: Result<Vec<_>, _> = store.list(&missing).try_collect().await;
    match result {
        Err(StoreError::NotFound(message)) => assert!(message.starts_with("itemNotFound")),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_maps_permission_errors() {
    let (server, store) = common::setup_store().await;

    Mock::given(method("GET"))
        .and(path(item_path("/Private.docx", None)))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(graph_error("accessDenied", "Access denied")),
        )
        .mount(&server)
        .await;

    let err = store.get(&common::path("/Private.docx")).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::Forbidden("accessDenied: Access denied".to_string())
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_throttled_request_retried_in_place() {
    let (server, store) = common::setup_store().await;
    let observer = Arc::new(common::RecordingObserver::default());
    let store = store.with_throttle_observer(observer.clone());

    Mock::given(method("GET"))
        .and(path(item_path("/a.txt", None)))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(item_path("/a.txt", None)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(file_item("a.txt", 3, "2024-01-01T00:00:00Z")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let record = store.get(&common::path("/a.txt")).await.unwrap();
    assert_eq!(record.size_bytes, 3);
    assert_eq!(observer.waits(), vec![Some(Duration::ZERO)]);
}

#[tokio::test]
async fn test_long_retry_after_returned_to_caller() {
    let (server, store) = common::setup_store().await;
    let observer = Arc::new(common::RecordingObserver::default());
    let store = store.with_throttle_observer(observer.clone());

    Mock::given(method("GET"))
        .and(path(item_path("/a.txt", None)))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .expect(1)
        .mount(&server)
        .await;

    let err = store.get(&common::path("/a.txt")).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::RateLimited {
            retry_after: Some(Duration::from_secs(120))
        }
    );
    assert!(observer.waits().is_empty());
}
