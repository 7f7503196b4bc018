//! Signaling error types.
//!
//! Only lookup failures are reported to the peer, as a single
//! `{type: "error", error}` reply. Everything else is logged and counted
//! server-side; the protocol has no reply for engine failures.

use crate::engine::{EngineError, EngineOperation};
use thiserror::Error;

/// Signaling service error type.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The message carried no usable `roomId`.
    #[error("Message has no room ID")]
    MissingRoomId,

    /// The room is not in the registry.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// The transport is not registered in the room.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// The producer vanished from the engine between capability check and consume.
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// A media engine call failed.
    #[error("Engine {} failed: {source}", operation.as_str())]
    Engine {
        operation: EngineOperation,
        #[source]
        source: EngineError,
    },

    /// The registry is shutting down and no longer creates rooms.
    #[error("Signaling service is draining")]
    Draining,

    /// Actor plumbing failure (mailbox closed, response dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Wrap an engine failure, tagging it with the operation that failed.
    pub fn engine(operation: EngineOperation, source: EngineError) -> Self {
        match source {
            EngineError::UnknownProducer(id) => SignalingError::ProducerNotFound(id),
            source => SignalingError::Engine { operation, source },
        }
    }

    /// Whether this error produces an `error` reply on the wire.
    pub fn is_reportable(&self) -> bool {
        matches!(
            self,
            SignalingError::MissingRoomId
                | SignalingError::RoomNotFound(_)
                | SignalingError::TransportNotFound(_)
        )
    }

    /// Returns the client-facing error text (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::MissingRoomId => "No room ID provided".to_string(),
            SignalingError::RoomNotFound(_) => "Room not found".to_string(),
            SignalingError::TransportNotFound(_) => "Transport not found".to_string(),
            SignalingError::ProducerNotFound(_) => "Producer not found".to_string(),
            SignalingError::Draining => "Server is shutting down, please reconnect".to_string(),
            SignalingError::Engine { .. } | SignalingError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Returns a bounded label string for the error variant (for metrics).
    pub fn error_type_label(&self) -> &'static str {
        match self {
            SignalingError::MissingRoomId => "missing_room_id",
            SignalingError::RoomNotFound(_) => "room_not_found",
            SignalingError::TransportNotFound(_) => "transport_not_found",
            SignalingError::ProducerNotFound(_) => "producer_not_found",
            SignalingError::Engine { .. } => "engine",
            SignalingError::Draining => "draining",
            SignalingError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lookup_failures_are_reportable() {
        assert!(SignalingError::MissingRoomId.is_reportable());
        assert!(SignalingError::RoomNotFound("r".to_string()).is_reportable());
        assert!(SignalingError::TransportNotFound("t".to_string()).is_reportable());

        assert!(!SignalingError::ProducerNotFound("p".to_string()).is_reportable());
        assert!(!SignalingError::Draining.is_reportable());
        assert!(!SignalingError::Internal("closed".to_string()).is_reportable());
        assert!(!SignalingError::engine(
            EngineOperation::Produce,
            EngineError::Rejected("bad codec".to_string())
        )
        .is_reportable());
    }

    #[test]
    fn test_client_messages_match_wire_protocol() {
        assert_eq!(
            SignalingError::MissingRoomId.client_message(),
            "No room ID provided"
        );
        assert_eq!(
            SignalingError::RoomNotFound("room-1".to_string()).client_message(),
            "Room not found"
        );
        assert_eq!(
            SignalingError::TransportNotFound("t-1".to_string()).client_message(),
            "Transport not found"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SignalingError::engine(
            EngineOperation::CreateTransport,
            EngineError::Unavailable("worker 10.0.0.7 died".to_string()),
        );
        assert!(!err.client_message().contains("10.0.0.7"));
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_unknown_producer_maps_to_not_found() {
        let err = SignalingError::engine(
            EngineOperation::Consume,
            EngineError::UnknownProducer("p-9".to_string()),
        );
        assert!(matches!(err, SignalingError::ProducerNotFound(ref id) if id == "p-9"));
    }

    #[test]
    fn test_error_type_labels() {
        assert_eq!(
            SignalingError::RoomNotFound("x".to_string()).error_type_label(),
            "room_not_found"
        );
        assert_eq!(
            SignalingError::engine(
                EngineOperation::Consume,
                EngineError::Rejected("x".to_string())
            )
            .error_type_label(),
            "engine"
        );
        assert_eq!(SignalingError::Draining.error_type_label(), "draining");
    }

    #[test]
    fn test_display_formatting() {
        let err = SignalingError::engine(
            EngineOperation::Produce,
            EngineError::Rejected("no codecs".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Engine produce failed: Request rejected: no codecs"
        );
    }
}
