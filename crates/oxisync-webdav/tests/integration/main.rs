//! Integration tests for oxisync-webdav
//!
//! Uses wiremock to stand in for an OxiCloud server and checks the requests
//! the adapters send and how they interpret the responses.

mod common;

mod test_auth;
mod test_listing;
mod test_transfers;
