//! Room Signaling Service Library
//!
//! A signaling coordinator for real-time media rooms. It multiplexes JSON
//! messages from many WebSocket-connected peers, keeps per-room membership and
//! media-session bookkeeping, and drives a media engine (an SFU) through the
//! narrow [`engine::MediaEngine`] interface.
//!
//! # Architecture
//!
//! ```text
//! ws (one reader + one writer task per socket)
//! └── ConnectionSession ──> Dispatcher
//!                           ├── MembershipIndex (room <-> connection)
//!                           └── RoomRegistryActor (singleton)
//!                               └── RoomActor (one per open room)
//!                                   └── MediaEngine
//! ```
//!
//! # Key Design Decisions
//!
//! - **Actor per room**: a room's transports, producers and consumers are
//!   only touched by its own actor
//! - **In-order per connection**: a connection's next message starts only
//!   after the previous one finished
//! - **Membership is not media state**: disconnecting never closes a room;
//!   only `close-room` does
//! - **Engine failures are silent on the wire**: they are logged and counted,
//!   and never leave partial room state behind
//!
//! # Modules
//!
//! - [`actors`] - Room registry and room actors
//! - [`config`] - Service configuration from environment
//! - [`connection`] - Connection identity, outbound queues, session lifecycle
//! - [`dispatcher`] - Inbound message routing
//! - [`engine`] - Media engine interface and the in-process engine
//! - [`errors`] - Error types and their wire mapping
//! - [`membership`] - Bidirectional room membership index
//! - [`observability`] - Metrics and health endpoints
//! - [`protocol`] - Wire message types
//! - [`ws`] - WebSocket front end

pub mod actors;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod membership;
pub mod observability;
pub mod protocol;
pub mod ws;
