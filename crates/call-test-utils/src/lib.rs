//! # Call Test Utilities
//!
//! Shared test utilities for the Call Controller.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable media engine with failure injection
//! - `recording_client` - Signaling client that records every event it gets
//! - `fixtures` - Identities, media parameter blobs and a wired-up harness
//! - `server_harness` - Real server on a random port for E2E tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::builder().build().await;
//!     let meeting = harness.create_meeting(HOST, &[ALICE, BOB]).await;
//!
//!     let mut host = harness.connect(HOST).await;
//!     host.send(&harness.router, initiate(&meeting, HOST, &[ALICE, BOB])).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod recording_client;
pub mod server_harness;

pub use fixtures::*;
pub use mock_engine::MockEngine;
pub use recording_client::RecordingClient;
pub use server_harness::TestCallServer;
