//! Shared test helpers for Egnyte integration tests

use std::sync::Mutex;
use std::time::Duration;

use esync_core::domain::RemotePath;
use esync_core::ports::ThrottleObserver;
use esync_egnyte::{EgnyteClient, EgnyteStore};
use serde_json::{json, Value};
use wiremock::MockServer;

/// Starts a mock server and a store pointed at it, listing two entries per page
pub async fn setup_store() -> (MockServer, EgnyteStore) {
    let server = MockServer::start().await;
    let client = EgnyteClient::with_base_url(&server.uri(), "test-access-token")
        .expect("valid mock server URL");
    let store = EgnyteStore::new(client).with_page_size(2);
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

pub fn file_entry(name: &str, size: u64, modified: &str) -> Value {
    json!({
        "name": name,
        "is_folder": false,
        "size": size,
        "checksum": format!("{:0>128}", name.len()),
        "last_modified": modified,
        "entry_id": format!("entry-{name}"),
        "group_id": format!("group-{name}")
    })
}

pub fn folder_entry(name: &str) -> Value {
    json!({
        "name": name,
        "is_folder": true,
        "folder_id": format!("folder-{name}"),
        "lastModified": 1_700_000_000_000_i64
    })
}
