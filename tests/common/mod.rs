//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient, USER_1};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_get_cursor() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::as_user(server.base_url.clone(), USER_1);
//!
//!     let response = client.get_cursor().await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{play_event, play_event_at};
pub use server::TestServer;
