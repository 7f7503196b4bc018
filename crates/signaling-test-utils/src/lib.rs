//! # Signaling Test Utilities
//!
//! Shared test utilities for the room signaling service.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable in-memory `MediaEngine`
//! - `fixtures` - Inbound wire payloads
//! - `harness` - Dispatcher harness with in-memory peers, and a WebSocket
//!   test server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = SignalingHarness::with_engine(
//!         MockMediaEngine::builder().reject_produce().build(),
//!     );
//!     let mut peer = harness.peer();
//!
//!     let transport_id = peer.create_transport("room-1").await;
//!     peer.send(&fixtures::produce("room-1", &transport_id, MediaKind::Audio)).await;
//!     peer.assert_silent().await;
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_engine;

pub use harness::{SignalingHarness, TestPeer, TestSignalingServer};
pub use mock_engine::{MockMediaEngine, MockMediaEngineBuilder};
pub use signaling_service::engine::MediaKind;
