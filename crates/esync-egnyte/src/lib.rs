//! esync Egnyte - Egnyte public API store
//!
//! Implements the `IFileStore` port over the Egnyte file system API:
//! - `/pubapi/v1/fs` for listings, metadata and deletes
//! - `/pubapi/v1/fs-content` for ranged downloads and small uploads
//! - `/pubapi/v1/fs-content-chunked` for chunked uploads
//!
//! ## Modules
//!
//! - [`client`] - Authenticated HTTP client, status mapping and throttle handling
//! - [`model`] - Listing and metadata payloads
//! - [`provider`] - `EgnyteStore`, the `IFileStore` implementation

pub mod client;
pub mod model;
pub mod provider;

pub use client::EgnyteClient;
pub use provider::EgnyteStore;

use thiserror::Error;

/// Errors raised while building an Egnyte client
#[derive(Debug, Error)]
pub enum EgnyteError {
    #[error("Egnyte domain is empty")]
    MissingDomain,

    #[error("Invalid Egnyte base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("Egnyte base URL cannot carry path segments: {0}")]
    NotABaseUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
