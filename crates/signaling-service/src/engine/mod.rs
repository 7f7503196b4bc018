//! Media engine adapter.
//!
//! The signaling service never routes media itself. Everything that touches
//! RTP, ICE or DTLS is delegated to a [`MediaEngine`] implementation through
//! the narrow capability surface below:
//!
//! | Operation | Engine call |
//! |-----------|-------------|
//! | Router capabilities | [`MediaEngine::create_router`] (cached per room) |
//! | WebRTC transport | [`MediaEngine::create_transport`] |
//! | DTLS exchange | [`MediaEngine::connect_transport`] |
//! | Publish a track | [`MediaEngine::produce`] |
//! | Codec check | [`MediaEngine::can_consume`] |
//! | Subscribe to a track | [`MediaEngine::consume`] |
//! | Room teardown | [`MediaEngine::close_room`] |
//!
//! Handles returned by the engine are plain data. The coordinator keys them by
//! their engine-issued `id` and passes negotiation parameters through as
//! opaque JSON.

pub mod local;

pub use local::{LocalEngineSettings, LocalMediaEngine};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Media track kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track.
    Audio,
    /// Video track.
    Video,
}

impl MediaKind {
    /// Returns the kind as it appears on the wire and in MIME type prefixes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-room routing context.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    /// Engine-issued router ID.
    pub id: String,
    /// Room the router was created for.
    pub room_id: String,
    /// Router RTP capabilities, sent verbatim to peers.
    pub rtp_capabilities: Value,
}

/// A WebRTC transport living on a router.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    /// Engine-issued transport ID.
    pub id: String,
    /// Router the transport belongs to.
    pub router_id: String,
}

/// Connection parameters a peer needs to reach a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    /// Transport ID.
    pub id: String,
    /// ICE username fragment and password.
    pub ice_parameters: Value,
    /// ICE candidates the peer should try.
    pub ice_candidates: Value,
    /// DTLS role and certificate fingerprints.
    pub dtls_parameters: Value,
}

/// A media source registered on a transport.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    /// Engine-issued producer ID.
    pub id: String,
    /// Transport the producer was created on.
    pub transport_id: String,
    /// Track kind.
    pub kind: MediaKind,
    /// RTP parameters as sent by the peer.
    pub rtp_parameters: Value,
}

/// A media sink delivering one producer's stream to a transport.
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    /// Engine-issued consumer ID.
    pub id: String,
    /// Producer being consumed.
    pub producer_id: String,
    /// Transport the consumer was created on.
    pub transport_id: String,
    /// Track kind (inherited from the producer).
    pub kind: MediaKind,
    /// RTP parameters the receiving peer must use.
    pub rtp_parameters: Value,
    /// Whether the consumer starts paused.
    pub paused: bool,
}

/// Media engine failures.
///
/// These never reach the peer: the protocol defines no reply for engine
/// failures, so they are logged and counted by the dispatcher.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The router does not exist (already closed).
    #[error("Router not found: {0}")]
    UnknownRouter(String),

    /// The transport does not exist in the engine.
    #[error("Transport not found: {0}")]
    UnknownTransport(String),

    /// The producer does not exist in the engine.
    #[error("Producer not found: {0}")]
    UnknownProducer(String),

    /// The engine refused the request (bad parameters, incompatible codecs).
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The engine could not be reached or is out of resources.
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

/// Engine operation names used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOperation {
    CreateRouter,
    CreateTransport,
    ConnectTransport,
    Produce,
    Consume,
    CloseRoom,
}

impl EngineOperation {
    /// Returns a bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EngineOperation::CreateRouter => "create_router",
            EngineOperation::CreateTransport => "create_transport",
            EngineOperation::ConnectTransport => "connect_transport",
            EngineOperation::Produce => "produce",
            EngineOperation::Consume => "consume",
            EngineOperation::CloseRoom => "close_room",
        }
    }
}

/// Capability interface to the SFU.
///
/// All mutating calls are asynchronous: they are requests against an external
/// engine. `can_consume` is a synchronous capability query against state the
/// engine already holds.
#[async_trait::async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create the routing context for a room.
    async fn create_router(&self, room_id: &str) -> Result<RouterHandle, EngineError>;

    /// Create a WebRTC transport on the router.
    async fn create_transport(
        &self,
        router: &RouterHandle,
    ) -> Result<(TransportHandle, TransportParams), EngineError>;

    /// Complete the DTLS exchange for a transport.
    async fn connect_transport(
        &self,
        transport: &TransportHandle,
        dtls_parameters: Value,
    ) -> Result<(), EngineError>;

    /// Register a media source on a transport.
    async fn produce(
        &self,
        transport: &TransportHandle,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerHandle, EngineError>;

    /// Create a consumer of `producer_id` on a transport.
    async fn consume(
        &self,
        transport: &TransportHandle,
        producer_id: &str,
        rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerHandle, EngineError>;

    /// Whether a peer with `rtp_capabilities` can consume `producer_id`.
    fn can_consume(&self, router: &RouterHandle, producer_id: &str, rtp_capabilities: &Value)
        -> bool;

    /// Tear down the router and every transport, producer and consumer on it.
    async fn close_room(&self, router: &RouterHandle) -> Result<(), EngineError>;
}

/// Shared engine reference held by the registry and every room actor.
pub type SharedMediaEngine = Arc<dyn MediaEngine>;
