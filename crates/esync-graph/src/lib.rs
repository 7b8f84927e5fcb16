//! esync Graph - SharePoint document library store
//!
//! Implements the `IFileStore` port over Microsoft Graph driveItems:
//! - Path-addressed listing with `@odata.nextLink` pagination
//! - Ranged content reads
//! - Resumable upload sessions with `Content-Range` chunks
//!
//! ## Modules
//!
//! - [`client`] - Authenticated HTTP client, status mapping and 429 handling
//! - [`items`] - DriveItem payloads and their conversion to `FileRecord`
//! - [`upload`] - Upload session creation, chunk upload and abort
//! - [`provider`] - `SharePointStore`, the `IFileStore` implementation

pub mod client;
pub mod items;
pub mod provider;
pub mod upload;

pub use client::GraphClient;
pub use items::DriveItem;
pub use provider::SharePointStore;

use thiserror::Error;

/// Errors raised while building a Graph client
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid Graph base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("Graph base URL cannot carry path segments: {0}")]
    NotABaseUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
