//! esync Core - Domain model and ports for the sync engine
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `FileRecord`, `SyncOperation`, `TransferTask`, `TaskOutcome`, `SyncJob`
//! - **Port definitions** - Traits for adapters: `FileStore`, `JobRepository`
//! - **Configuration** - YAML configuration with validation and environment overrides
//!
//! # Architecture
//!
//! The domain module holds pure data and state transitions with no I/O.
//! Ports define trait interfaces that the provider and persistence crates
//! implement. The engine crate orchestrates domain entities through ports.

pub mod config;
pub mod domain;
pub mod ports;
