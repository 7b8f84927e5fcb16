//! Integration tests for esync-egnyte
//!
//! Uses wiremock to simulate the Egnyte public API.

mod common;

mod test_listing;
mod test_transfers;
