//! Integration tests for esync-graph
//!
//! Uses wiremock to simulate the Microsoft Graph API and verifies the
//! SharePointStore's listing, reads, upload sessions and deletes.

mod common;

mod test_listing;
mod test_transfers;
