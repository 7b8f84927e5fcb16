//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IFileStore`] - Remote file store operations (Egnyte, SharePoint, in-memory)
//! - [`IJobRepository`] - Persistent storage for sync job snapshots

pub mod file_store;
pub mod job_repository;

pub use file_store::{
    ByteRange, ByteStream, DeleteOutcome, IFileStore, RecordStream, StoreError, ThrottleObserver,
};
pub use job_repository::IJobRepository;
