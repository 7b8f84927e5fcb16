//! Egnyte public API client
//!
//! Wraps `reqwest::Client` with the bearer header, `/pubapi/v1` URL
//! construction and Egnyte's error conventions. Egnyte signals throttling
//! either with HTTP 429 or with a 403 carrying an `X-Mashery-Error-Code`
//! of `ERR_403_DEVELOPER_OVER_QPS` / `ERR_403_DEVELOPER_OVER_RATE`; both are
//! reported as [`StoreError::RateLimited`].

use std::sync::Arc;
use std::time::Duration;

use esync_core::domain::RemotePath;
use esync_core::ports::{StoreError, ThrottleObserver};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::EgnyteError;

/// Wait used when a throttled response has no Retry-After header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Throttled requests retried in place before the error reaches the caller
const DEFAULT_MAX_THROTTLE_RETRIES: u32 = 3;

/// Longest Retry-After waited out in place
const MAX_INLINE_RETRY_AFTER: Duration = Duration::from_secs(60);

const MASHERY_ERROR_HEADER: &str = "X-Mashery-Error-Code";

/// API families under `/pubapi/v1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Metadata, listings and deletes
    Fs,
    /// File content download and single-request upload
    FsContent,
    /// Chunked upload
    FsContentChunked,
}

impl Endpoint {
    fn segment(self) -> &'static str {
        match self {
            Endpoint::Fs => "fs",
            Endpoint::FsContent => "fs-content",
            Endpoint::FsContentChunked => "fs-content-chunked",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for one Egnyte domain
#[derive(Debug, Clone)]
pub struct EgnyteClient {
    client: Client,
    base_url: Url,
    access_token: String,
    max_throttle_retries: u32,
    throttle_observer: Option<Arc<dyn ThrottleObserver>>,
}

impl EgnyteClient {
    /// Creates a client for `https://{domain}.egnyte.com`
    pub fn new(domain: &str, access_token: impl Into<String>) -> Result<Self, EgnyteError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(EgnyteError::MissingDomain);
        }
        Self::with_base_url(&format!("https://{domain}.egnyte.com"), access_token)
    }

    /// Creates a client with a custom base URL (tests, proxies)
    pub fn with_base_url(
        base_url: &str,
        access_token: impl Into<String>,
    ) -> Result<Self, EgnyteError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(EgnyteError::NotABaseUrl(base_url.to_string()));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            access_token: access_token.into(),
            max_throttle_retries: DEFAULT_MAX_THROTTLE_RETRIES,
            throttle_observer: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, EgnyteError> {
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

    /// URL of `path` under one of the `/pubapi/v1` endpoints
    pub fn url(&self, endpoint: Endpoint, path: &RemotePath) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StoreError::InvalidResponse(format!("Cannot address {path}")))?;
            segments
                .pop_if_empty()
                .push("pubapi")
                .push("v1")
                .push(endpoint.segment());
            if path.is_root() {
                segments.push("");
            } else {
                segments.extend(path.as_str()[1..].split('/'));
            }
        }
        Ok(url)
    }

    /// Creates an authenticated request builder
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Sends a request, waiting out short throttles in place
    ///
    /// `build` is called once per attempt, so only use this for requests
    /// whose body is cheap to rebuild.
    pub async fn send<F>(&self, what: &str, build: F) -> Result<Response, StoreError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let response = build().send().await.map_err(transport_error)?;
            if !is_throttled(&response) {
                return check(response).await;
            }

            let retry_after = retry_after_header(&response);
            let wait = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
            if attempt >= self.max_throttle_retries || wait > MAX_INLINE_RETRY_AFTER {
                warn!(what, attempts = attempt + 1, "Egnyte throttled the request");
                return Err(StoreError::RateLimited { retry_after });
            }

            attempt += 1;
            info!(
                what,
                attempt,
                retry_after_ms = wait.as_millis() as u64,
                "Throttled by Egnyte, backing off"
            );
            if let Some(observer) = &self.throttle_observer {
                observer.on_throttled(Some(wait));
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Sends a request once; throttling is returned to the caller
    pub async fn send_once(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(transport_error)?;
        check(response).await
    }
}

fn is_throttled(response: &Response) -> bool {
    match response.status() {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => response
            .headers()
            .get(MASHERY_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|code| code.contains("OVER_QPS") || code.contains("OVER_RATE")),
        _ => false,
    }
}

fn retry_after_header(response: &Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?;
    match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(secs) => Some(Duration::from_secs(secs)),
        None => {
            warn!(?value, "Unparseable Retry-After header");
            None
        }
    }
}

/// Passes successful responses through and maps the rest to [`StoreError`]
pub(crate) async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(status_error(response).await)
}

pub(crate) async fn status_error(response: Response) -> StoreError {
    if is_throttled(&response) {
        return StoreError::RateLimited {
            retry_after: retry_after_header(&response),
        };
    }

    let status = response.status();
    let retry_after = retry_after_header(&response);
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error_message.or(b.message))
        .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty() && b.len() < 512))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    debug!(status = status.as_u16(), %message, "Egnyte request failed");
    StoreError::from_status(status.as_u16(), message, retry_after)
}

pub(crate) async fn json<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    response
        .json()
        .await
        .map_err(|e| StoreError::InvalidResponse(e.to_string()))
}

pub(crate) fn transport_error(error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Timeout(error.to_string())
    } else if error.is_decode() {
        StoreError::InvalidResponse(error.to_string())
    } else {
        StoreError::Network(error.to_string())
    }
}
