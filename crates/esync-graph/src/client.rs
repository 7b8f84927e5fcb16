//! Microsoft Graph API client
//!
//! Provides an authenticated HTTP client scoped to one drive (a SharePoint
//! document library). Handles the bearer header, path-based item addressing,
//! error status mapping and in-place retries of throttled requests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use esync_core::domain::RemotePath;
//! use esync_graph::client::GraphClient;
//! use reqwest::Method;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = GraphClient::new("access-token-here", "b!drive-id")?;
//! let url = client.item_url(&RemotePath::new("/Documents".into())?, Some("children"))?;
//! let response = client
//!     .send("list children", || client.request(Method::GET, url.clone()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use esync_core::domain::RemotePath;
use esync_core::ports::{StoreError, ThrottleObserver};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::GraphError;

/// Base URL for Microsoft Graph API v1.0
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Default retry-after duration when header is missing (30 seconds)
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Throttled requests retried in place before the error reaches the caller
const DEFAULT_MAX_THROTTLE_RETRIES: u32 = 3;

/// Longest Retry-After waited out in place; longer waits go back to the scheduler
const MAX_INLINE_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Graph error envelope: `{"error": {"code": "...", "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// GraphClient
// ============================================================================

/// HTTP client for one Graph drive
#[derive(Debug, Clone)]
pub struct GraphClient {
    client: Client,
    base_url: Url,
    drive_id: String,
    access_token: String,
    max_throttle_retries: u32,
    throttle_observer: Option<Arc<dyn ThrottleObserver>>,
}

impl GraphClient {
    /// Creates a client for `drive_id` on the public Graph endpoint
    pub fn new(
        access_token: impl Into<String>,
        drive_id: impl Into<String>,
    ) -> Result<Self, GraphError> {
        Self::with_base_url(access_token, drive_id, GRAPH_BASE_URL)
    }

    /// Creates a client with a custom base URL (tests, national clouds)
    pub fn with_base_url(
        access_token: impl Into<String>,
        drive_id: impl Into<String>,
        base_url: &str,
    ) -> Result<Self, GraphError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(GraphError::NotABaseUrl(base_url.to_string()));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            drive_id: drive_id.into(),
            access_token: access_token.into(),
            max_throttle_retries: DEFAULT_MAX_THROTTLE_RETRIES,
            throttle_observer: None,
        })
    }

    /// Applies a per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, GraphError> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_max_throttle_retries(mut self, retries: u32) -> Self {
        self.max_throttle_retries = retries;
        self
    }

    /// Reports every throttle waited out in place to `observer`
    pub fn with_throttle_observer(mut self, observer: Arc<dyn ThrottleObserver>) -> Self {
        self.throttle_observer = Some(observer);
        self
    }

    pub fn drive_id(&self) -> &str {
        &self.drive_id
    }

    /// URL addressing `path` inside the drive, optionally followed by an action
    ///
    /// The root is `/drives/{id}/root`; anything below it uses Graph's
    /// path syntax, `/drives/{id}/root:/a/b.txt:`. Each name is percent-encoded
    /// as a single segment.
    pub fn item_url(&self, path: &RemotePath, action: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StoreError::InvalidResponse(format!("Cannot address {path}")))?;
            segments.pop_if_empty().push("drives").push(&self.drive_id);

            if path.is_root() {
                segments.push("root");
            } else {
                segments.push("root:");
                let names: Vec<&str> = path.as_str()[1..].split('/').collect();
                let last = names.len() - 1;
                for (i, name) in names.iter().enumerate() {
                    if i == last {
                        segments.push(&format!("{name}:"));
                    } else {
                        segments.push(name);
                    }
                }
            }

            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    /// Creates an authenticated request builder for an absolute URL
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Unauthenticated client for pre-authenticated URLs (upload sessions)
    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Sends a request, waiting out HTTP 429 responses in place
    ///
    /// `build` is called once per attempt. A throttle whose Retry-After is
    /// longer than a minute, or one past the retry limit, is returned as
    /// [`StoreError::RateLimited`] so the scheduler can reschedule the task
    /// without holding a worker. Any other non-success status is mapped to
    /// the matching [`StoreError`].
    pub async fn send<F>(&self, what: &str, build: F) -> Result<Response, StoreError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let response = build().send().await.map_err(transport_error)?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                if attempt > 0 {
                    info!(what, attempt, "Request succeeded after throttling");
                }
                return check(response).await;
            }

            let retry_after = retry_after_header(&response);
            let wait = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
            if attempt >= self.max_throttle_retries || wait > MAX_INLINE_RETRY_AFTER {
                warn!(
                    what,
                    attempts = attempt + 1,
                    retry_after_ms = wait.as_millis() as u64,
                    "Throttled, handing back to the scheduler"
                );
                return Err(StoreError::RateLimited { retry_after });
            }

            attempt += 1;
            info!(
                what,
                attempt,
                retry_after_ms = wait.as_millis() as u64,
                "Received 429, backing off"
            );
            if let Some(observer) = &self.throttle_observer {
                observer.on_throttled(Some(wait));
            }
            tokio::time::sleep(wait).await;
        }
    }
}

// ============================================================================
// Response helpers
// ============================================================================

/// Passes successful responses through and maps the rest to [`StoreError`]
pub(crate) async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(status_error(response).await)
}

/// Maps a non-success response to [`StoreError`], keeping Graph's error code
pub(crate) async fn status_error(response: Response) -> StoreError {
    let status = response.status();
    let retry_after = retry_after_header(&response);
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .map(|envelope| match (envelope.error.code, envelope.error.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code,
            (None, Some(message)) => message,
            (None, None) => String::new(),
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    debug!(status = status.as_u16(), %message, "Graph request failed");
    StoreError::from_status(status.as_u16(), message, retry_after)
}

/// Deserializes a JSON body
pub(crate) async fn json<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    response
        .json()
        .await
        .map_err(|e| StoreError::InvalidResponse(e.to_string()))
}

/// Maps a transport-level reqwest failure
pub(crate) fn transport_error(error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Timeout(error.to_string())
    } else if error.is_decode() {
        StoreError::InvalidResponse(error.to_string())
    } else {
        StoreError::Network(error.to_string())
    }
}

fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
}

/// Parses a Retry-After value given as seconds or as an HTTP date
///
/// Dates more than an hour away, in the past, or unparseable fall back to
/// `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target > now {
            if let Some(secs) = (target - now)
                .num_seconds()
                .try_into()
                .ok()
                .filter(|&s: &u64| s <= 3600)
            {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
