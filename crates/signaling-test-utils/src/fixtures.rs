//! Wire message fixtures.
//!
//! Builders for inbound JSON payloads, matching what a browser client sends.

use serde_json::{json, Value};
use signaling_service::engine::MediaKind;

/// Receive capabilities that accept opus and VP8.
#[must_use]
pub fn peer_rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })
}

/// Send parameters for one track of `kind`.
#[must_use]
pub fn rtp_parameters(kind: MediaKind) -> Value {
    let codec = match kind {
        MediaKind::Audio => json!({
            "mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000, "channels": 2
        }),
        MediaKind::Video => json!({
            "mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000
        }),
    };
    json!({
        "mid": "0",
        "codecs": [codec],
        "encodings": [{ "ssrc": 1111 }]
    })
}

/// Client DTLS parameters.
#[must_use]
pub fn dtls_parameters() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD:EF" }]
    })
}

#[must_use]
pub fn get_rtp_capabilities(room_id: &str) -> String {
    json!({ "type": "get-rtp-capabilities", "roomId": room_id }).to_string()
}

#[must_use]
pub fn create_transport(room_id: &str) -> String {
    json!({ "type": "create-transport", "roomId": room_id }).to_string()
}

#[must_use]
pub fn connect_transport(room_id: &str, transport_id: &str) -> String {
    json!({
        "type": "connect-transport",
        "roomId": room_id,
        "transportId": transport_id,
        "dtlsParameters": dtls_parameters()
    })
    .to_string()
}

#[must_use]
pub fn produce(room_id: &str, transport_id: &str, kind: MediaKind) -> String {
    json!({
        "type": "produce",
        "roomId": room_id,
        "transportId": transport_id,
        "kind": kind,
        "rtpParameters": rtp_parameters(kind)
    })
    .to_string()
}

#[must_use]
pub fn consume(room_id: &str, transport_id: &str) -> String {
    json!({
        "type": "consume",
        "roomId": room_id,
        "transportId": transport_id,
        "rtpCapabilities": peer_rtp_capabilities()
    })
    .to_string()
}

#[must_use]
pub fn close_room(room_id: &str) -> String {
    json!({ "type": "close-room", "roomId": room_id }).to_string()
}
