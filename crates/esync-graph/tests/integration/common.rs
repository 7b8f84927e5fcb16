//! Shared test helpers for Graph integration tests

use std::sync::Mutex;
use std::time::Duration;

use esync_core::domain::RemotePath;
use esync_core::ports::ThrottleObserver;
use esync_graph::{GraphClient, SharePointStore};
use serde_json::{json, Value};
use wiremock::MockServer;

pub const DRIVE_ID: &str = "drive-1";

/// Starts a mock server and a store pointed at it, listing two items per page
pub async fn setup_store() -> (MockServer, SharePointStore) {
    let server = MockServer::start().await;
    let client = GraphClient::with_base_url("test-access-token", DRIVE_ID, &server.uri())
        .expect("valid mock server URL");
    let store = SharePointStore::new(client).with_page_size(2);
    (server, store)
}

/// Records every throttle the client waits out in place
#[derive(Debug, Default)]
pub struct RecordingObserver {
    waits: Mutex<Vec<Option<Duration>>>,
}

impl RecordingObserver {
    pub fn waits(&self) -> Vec<Option<Duration>> {
        self.waits.lock().unwrap().clone()
    }
}

impl ThrottleObserver for RecordingObserver {
    fn on_throttled(&self, retry_after: Option<Duration>) {
        self.waits.lock().unwrap().push(retry_after);
    }
}

pub fn path(p: &str) -> RemotePath {
    RemotePath::new(p.to_string()).unwrap()
}

/// URL path of an item under the drive root, e.g. `/drives/drive-1/root:/Docs:/children`
pub fn item_path(p: &str, action: Option<&str>) -> String {
    let base = format!("/drives/{DRIVE_ID}/root:{p}:");
    match action {
        Some(action) => format!("{base}/{action}"),
        None => base,
    }
}

pub fn file_item(name: &str, size: u64, modified: &str) -> Value {
    json!({
        "id": format!("id-{name}"),
        "name": name,
        "size": size,
        "lastModifiedDateTime": "2024-06-01T00:00:00Z",
        "fileSystemInfo": { "lastModifiedDateTime": modified },
        "file": { "hashes": { "quickXorHash": format!("qx-{name}") } }
    })
}

pub fn folder_item(name: &str) -> Value {
    json!({
        "id": format!("id-{name}"),
        "name": name,
        "lastModifiedDateTime": "2024-06-01T00:00:00Z",
        "folder": { "childCount": 0 }
    })
}

pub fn graph_error(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}
