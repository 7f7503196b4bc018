//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Replies use `tokio::sync::oneshot`.

use super::metrics::MailboxLevel;
use super::room::RoomActorHandle;
use crate::engine::{MediaKind, TransportParams};
use crate::errors::SignalingError;
use crate::protocol::ServerMessage;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the room's actor, spawning it on first use.
    GetOrCreateRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<RoomActorHandle, SignalingError>>,
    },

    /// Non-creating lookup.
    GetRoom {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// Unregister a room. Replies with the removed handle so the caller can
    /// tear it down without holding up the registry.
    RemoveRoom {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// Get registry status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and cancel every room actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Router RTP capabilities.
    GetRtpCapabilities {
        respond_to: oneshot::Sender<Result<Value, SignalingError>>,
    },

    /// Create and register a WebRTC transport.
    CreateTransport {
        respond_to: oneshot::Sender<Result<TransportParams, SignalingError>>,
    },

    /// Complete the DTLS exchange for a registered transport.
    ConnectTransport {
        transport_id: String,
        dtls_parameters: Value,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Create and register a producer. Replies with the producer ID.
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        respond_to: oneshot::Sender<Result<String, SignalingError>>,
    },

    /// Create one consumer per compatible producer, pushing each
    /// `consumer-created` into `replies` as it is made. Replies with the
    /// number of consumers created.
    ///
    /// `replies` is unbounded so the actor never waits on the issuing peer.
    Consume {
        transport_id: String,
        rtp_capabilities: Value,
        replies: mpsc::UnboundedSender<ServerMessage>,
        respond_to: oneshot::Sender<Result<usize, SignalingError>>,
    },

    /// Tear down the room's engine resources. The actor exits afterwards.
    Close {
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Get current room state (for debugging/tests).
    GetState {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    /// `None` until router creation has succeeded.
    pub router_id: Option<String>,
    pub transport_ids: Vec<String>,
    pub producer_ids: Vec<String>,
    pub consumer_ids: Vec<String>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    pub mailbox_depth: usize,
    pub mailbox_peak: usize,
}

/// Registry status (for health checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
    pub mailbox_peak: usize,
    pub mailbox_level: MailboxLevel,
}
