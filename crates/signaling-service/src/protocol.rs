//! Wire protocol.
//!
//! Every message is a JSON object with a `type` discriminator. Inbound
//! messages also carry `roomId`. Parsing happens in two stages so the
//! dispatcher can register room membership before it looks at the body:
//!
//! 1. [`parse_envelope`] decodes the JSON object and extracts `roomId`.
//! 2. [`Envelope::into_message`] decodes the typed [`ClientMessage`].
//!
//! Unknown `type` values decode to [`ClientMessage::Unknown`]. A known type
//! with an invalid body is a [`ProtocolError::InvalidBody`].

use crate::engine::{MediaKind, TransportParams};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Inbound message, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask for the room's router capabilities.
    GetRtpCapabilities,

    /// Ask for a new WebRTC transport in the room.
    CreateTransport,

    /// Complete the DTLS exchange for a transport. Has no success reply.
    #[serde(rename_all = "camelCase")]
    ConnectTransport {
        #[serde(default)]
        transport_id: String,
        #[serde(default)]
        dtls_parameters: Value,
    },

    /// Publish a track on a transport.
    #[serde(rename_all = "camelCase")]
    Produce {
        #[serde(default)]
        transport_id: String,
        kind: MediaKind,
        #[serde(default)]
        rtp_parameters: Value,
    },

    /// Subscribe to every compatible producer in the room.
    #[serde(rename_all = "camelCase")]
    Consume {
        #[serde(default)]
        transport_id: String,
        #[serde(default)]
        rtp_capabilities: Value,
    },

    /// Tear the room down and notify the other members.
    CloseRoom,

    /// Any other `type`. Logged and ignored.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Bounded label for logs and metrics.
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::GetRtpCapabilities => "get-rtp-capabilities",
            ClientMessage::CreateTransport => "create-transport",
            ClientMessage::ConnectTransport { .. } => "connect-transport",
            ClientMessage::Produce { .. } => "produce",
            ClientMessage::Consume { .. } => "consume",
            ClientMessage::CloseRoom => "close-room",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// Outbound message, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RtpCapabilities { rtp_capabilities: Value },

    TransportCreated { params: TransportParams },

    Produced { id: String },

    #[serde(rename_all = "camelCase")]
    ConsumerCreated {
        id: String,
        producer_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
    },

    /// The room was closed by another member.
    StreamStopped,

    Error { error: String },
}

impl ServerMessage {
    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Bounded label for logs and metrics.
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::RtpCapabilities { .. } => "rtp-capabilities",
            ServerMessage::TransportCreated { .. } => "transport-created",
            ServerMessage::Produced { .. } => "produced",
            ServerMessage::ConsumerCreated { .. } => "consumer-created",
            ServerMessage::StreamStopped => "stream-stopped",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Protocol decoding failures. Never answered on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload is not JSON.
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload is JSON but not an object.
    #[error("Message is not a JSON object")]
    NotAnObject,

    /// Known `type` whose fields do not decode.
    #[error("Invalid {message_type} body: {source}")]
    InvalidBody {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded JSON object whose body has not been interpreted yet.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// `roomId`, present only when it is a non-empty string.
    pub room_id: Option<String>,
    /// Raw `type`, when it is a string.
    pub message_type: Option<String>,
    body: Map<String, Value>,
}

/// Decode a text payload into an [`Envelope`].
pub fn parse_envelope(payload: &str) -> Result<Envelope, ProtocolError> {
    let Value::Object(body) = serde_json::from_str::<Value>(payload)? else {
        return Err(ProtocolError::NotAnObject);
    };

    let room_id = body
        .get("roomId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let message_type = body
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Envelope {
        room_id,
        message_type,
        body,
    })
}

impl Envelope {
    /// Decode the typed message.
    pub fn into_message(self) -> Result<ClientMessage, ProtocolError> {
        let Some(message_type) = self.message_type else {
            return Ok(ClientMessage::Unknown);
        };
        serde_json::from_value(Value::Object(self.body))
            .map_err(|source| ProtocolError::InvalidBody {
                message_type,
                source,
            })
    }
}
