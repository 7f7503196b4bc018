//! Actor model implementation for the signaling service.
//!
//! ```text
//! RoomRegistryActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per open room)
//!         ├── owns the router handle
//!         └── owns transports, producers and consumers
//! ```
//!
//! # Key Design Decisions
//!
//! - **Actor per room**: engine calls and state mutations for one room are
//!   serialized; different rooms never wait on each other
//! - **Atomic lazy creation**: the registry is a single mailbox, so the first
//!   `get_or_create` for a room ID spawns exactly one `RoomActor`
//! - **CancellationToken propagation**: rooms get child tokens of the registry
//! - **Mailbox monitoring**: depth thresholds (Registry: 100/500, Room: 50/200)
//!
//! Connection membership is not actor state; see [`crate::membership`].
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` singleton that owns room lifetimes
//! - [`room`] - `RoomActor` per open room
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

// Re-export primary types
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
