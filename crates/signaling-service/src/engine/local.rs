//! `LocalMediaEngine` - in-process engine for signaling-only deployments.
//!
//! Performs the bookkeeping half of an SFU: it mints router, transport,
//! producer and consumer IDs, generates ICE credentials and DTLS
//! fingerprints, validates producer codecs against the router capabilities
//! and answers `can_consume` by codec matching. It moves no media.
//!
//! Codec matching compares `mimeType` (case-insensitive) and `clockRate`,
//! ignoring retransmission (`*/rtx`) entries.

use super::{
    ConsumerHandle, EngineError, MediaEngine, MediaKind, ProducerHandle, RouterHandle,
    TransportHandle, TransportParams,
};

use rand::Rng;
use ring::digest;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// ICE candidate priority for host UDP candidates.
const HOST_CANDIDATE_PRIORITY: u32 = 1_076_302_079;

/// Settings for the local engine.
#[derive(Debug, Clone)]
pub struct LocalEngineSettings {
    /// IP placed in ICE candidates.
    pub announced_ip: IpAddr,
    /// Lowest candidate port.
    pub rtc_min_port: u16,
    /// Highest candidate port.
    pub rtc_max_port: u16,
    /// Codecs every router advertises.
    pub media_codecs: Vec<Value>,
}

impl Default for LocalEngineSettings {
    fn default() -> Self {
        Self {
            announced_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtc_min_port: 40000,
            rtc_max_port: 49999,
            media_codecs: default_media_codecs(),
        }
    }
}

/// Codecs advertised by default: Opus, VP8 and baseline H.264.
#[must_use]
pub fn default_media_codecs() -> Vec<Value> {
    vec![
        json!({
            "kind": "audio",
            "mimeType": "audio/opus",
            "clockRate": 48000,
            "channels": 2,
            "preferredPayloadType": 100,
            "parameters": {},
            "rtcpFeedback": [{ "type": "transport-cc", "parameter": "" }]
        }),
        json!({
            "kind": "video",
            "mimeType": "video/VP8",
            "clockRate": 90000,
            "preferredPayloadType": 101,
            "parameters": {},
            "rtcpFeedback": [
                { "type": "nack", "parameter": "" },
                { "type": "nack", "parameter": "pli" },
                { "type": "ccm", "parameter": "fir" },
                { "type": "goog-remb", "parameter": "" }
            ]
        }),
        json!({
            "kind": "video",
            "mimeType": "video/H264",
            "clockRate": 90000,
            "preferredPayloadType": 102,
            "parameters": {
                "packetization-mode": 1,
                "profile-level-id": "42e01f",
                "level-asymmetry-allowed": 1
            },
            "rtcpFeedback": [
                { "type": "nack", "parameter": "" },
                { "type": "nack", "parameter": "pli" },
                { "type": "ccm", "parameter": "fir" },
                { "type": "goog-remb", "parameter": "" }
            ]
        }),
    ]
}

/// Object counts held by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub routers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

#[derive(Debug)]
struct RouterEntry {
    room_id: String,
    codecs: Vec<Value>,
}

#[derive(Debug)]
struct TransportEntry {
    router_id: String,
    connected: bool,
}

#[derive(Debug)]
struct ProducerEntry {
    router_id: String,
    kind: MediaKind,
    codecs: Vec<Value>,
}

#[derive(Debug)]
struct ConsumerEntry {
    router_id: String,
}

#[derive(Debug, Default)]
struct EngineState {
    routers: HashMap<String, RouterEntry>,
    transports: HashMap<String, TransportEntry>,
    producers: HashMap<String, ProducerEntry>,
    consumers: HashMap<String, ConsumerEntry>,
    next_mid: u64,
}

/// In-process media engine.
#[derive(Debug)]
pub struct LocalMediaEngine {
    settings: LocalEngineSettings,
    state: Mutex<EngineState>,
}

impl Default for LocalMediaEngine {
    fn default() -> Self {
        Self::new(LocalEngineSettings::default())
    }
}

impl LocalMediaEngine {
    /// Create an engine with the given settings.
    #[must_use]
    pub fn new(settings: LocalEngineSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Current object counts.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let state = self.state();
        EngineStats {
            routers: state.routers.len(),
            transports: state.transports.len(),
            producers: state.producers.len(),
            consumers: state.consumers.len(),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ice_parameters() -> Value {
        let ufrag: [u8; 8] = rand::random();
        let password: [u8; 16] = rand::random();
        json!({
            "usernameFragment": hex::encode(ufrag),
            "password": hex::encode(password),
            "iceLite": true
        })
    }

    fn ice_candidates(&self) -> Value {
        let (low, high) = if self.settings.rtc_min_port <= self.settings.rtc_max_port {
            (self.settings.rtc_min_port, self.settings.rtc_max_port)
        } else {
            (self.settings.rtc_max_port, self.settings.rtc_min_port)
        };
        let port = rand::thread_rng().gen_range(low..=high);
        let ip = self.settings.announced_ip.to_string();
        json!([{
            "foundation": "udpcandidate",
            "priority": HOST_CANDIDATE_PRIORITY,
            "ip": ip,
            "address": ip,
            "protocol": "udp",
            "port": port,
            "type": "host"
        }])
    }

    fn dtls_parameters() -> Value {
        let seed: [u8; 32] = rand::random();
        let fingerprint = digest::digest(&digest::SHA256, &seed)
            .as_ref()
            .iter()
            .map(|byte| hex::encode_upper([*byte]))
            .collect::<Vec<_>>()
            .join(":");
        json!({
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": fingerprint }]
        })
    }
}

/// `(lowercased mimeType, clockRate)` for a codec entry.
fn codec_key(codec: &Value) -> Option<(String, u64)> {
    let mime = codec.get("mimeType")?.as_str()?.to_ascii_lowercase();
    let clock_rate = codec.get("clockRate")?.as_u64()?;
    Some((mime, clock_rate))
}

fn is_rtx(codec: &Value) -> bool {
    codec_key(codec).is_some_and(|(mime, _)| mime.ends_with("/rtx"))
}

fn codec_list(value: &Value) -> &[Value] {
    value
        .get("codecs")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// Producer codecs the remote capabilities can receive.
fn matching_codecs(producer_codecs: &[Value], rtp_capabilities: &Value) -> Vec<Value> {
    let supported: Vec<(String, u64)> = codec_list(rtp_capabilities)
        .iter()
        .filter_map(codec_key)
        .collect();

    producer_codecs
        .iter()
        .filter(|codec| !is_rtx(codec))
        .filter(|codec| codec_key(codec).is_some_and(|key| supported.contains(&key)))
        .cloned()
        .collect()
}

#[async_trait::async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn create_router(&self, room_id: &str) -> Result<RouterHandle, EngineError> {
        let id = Uuid::new_v4().to_string();
        let codecs = self.settings.media_codecs.clone();
        let rtp_capabilities = json!({
            "codecs": codecs,
            "headerExtensions": []
        });

        self.state().routers.insert(
            id.clone(),
            RouterEntry {
                room_id: room_id.to_string(),
                codecs: self.settings.media_codecs.clone(),
            },
        );

        debug!(
            target: "signaling.engine",
            room_id = %room_id,
            router_id = %id,
            "Router created"
        );

        Ok(RouterHandle {
            id,
            room_id: room_id.to_string(),
            rtp_capabilities,
        })
    }

    async fn create_transport(
        &self,
        router: &RouterHandle,
    ) -> Result<(TransportHandle, TransportParams), EngineError> {
        let id = Uuid::new_v4().to_string();
        {
            let mut state = self.state();
            if !state.routers.contains_key(&router.id) {
                return Err(EngineError::UnknownRouter(router.id.clone()));
            }
            state.transports.insert(
                id.clone(),
                TransportEntry {
                    router_id: router.id.clone(),
                    connected: false,
                },
            );
        }

        let params = TransportParams {
            id: id.clone(),
            ice_parameters: Self::ice_parameters(),
            ice_candidates: self.ice_candidates(),
            dtls_parameters: Self::dtls_parameters(),
        };

        Ok((
            TransportHandle {
                id,
                router_id: router.id.clone(),
            },
            params,
        ))
    }

    async fn connect_transport(
        &self,
        transport: &TransportHandle,
        dtls_parameters: Value,
    ) -> Result<(), EngineError> {
        let has_fingerprint = dtls_parameters
            .get("fingerprints")
            .and_then(Value::as_array)
            .is_some_and(|fingerprints| !fingerprints.is_empty());
        if !has_fingerprint {
            return Err(EngineError::Rejected(
                "dtlsParameters must carry at least one fingerprint".to_string(),
            ));
        }

        let mut state = self.state();
        let entry = state
            .transports
            .get_mut(&transport.id)
            .ok_or_else(|| EngineError::UnknownTransport(transport.id.clone()))?;
        if entry.connected {
            return Err(EngineError::Rejected("connect() already called".to_string()));
        }
        entry.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        transport: &TransportHandle,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerHandle, EngineError> {
        let codecs: Vec<Value> = codec_list(&rtp_parameters).to_vec();
        if codecs.is_empty() {
            return Err(EngineError::Rejected(
                "rtpParameters must list at least one codec".to_string(),
            ));
        }

        let mut state = self.state();
        let router_id = state
            .transports
            .get(&transport.id)
            .map(|entry| entry.router_id.clone())
            .ok_or_else(|| EngineError::UnknownTransport(transport.id.clone()))?;
        let router = state
            .routers
            .get(&router_id)
            .ok_or_else(|| EngineError::UnknownRouter(router_id.clone()))?;

        let prefix = format!("{}/", kind.as_str());
        for codec in codecs.iter().filter(|codec| !is_rtx(codec)) {
            let (mime, clock_rate) = codec_key(codec)
                .ok_or_else(|| EngineError::Rejected("codec without mimeType".to_string()))?;
            if !mime.starts_with(&prefix) {
                return Err(EngineError::Rejected(format!(
                    "codec {mime} does not match kind {kind}"
                )));
            }
            let supported = router
                .codecs
                .iter()
                .filter_map(codec_key)
                .any(|key| key == (mime.clone(), clock_rate));
            if !supported {
                return Err(EngineError::Rejected(format!(
                    "codec {mime} not supported by router"
                )));
            }
        }

        let id = Uuid::new_v4().to_string();
        state.producers.insert(
            id.clone(),
            ProducerEntry {
                router_id,
                kind,
                codecs,
            },
        );

        Ok(ProducerHandle {
            id,
            transport_id: transport.id.clone(),
            kind,
            rtp_parameters,
        })
    }

    async fn consume(
        &self,
        transport: &TransportHandle,
        producer_id: &str,
        rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerHandle, EngineError> {
        let mut state = self.state();
        let router_id = state
            .transports
            .get(&transport.id)
            .map(|entry| entry.router_id.clone())
            .ok_or_else(|| EngineError::UnknownTransport(transport.id.clone()))?;
        let producer = state
            .producers
            .get(producer_id)
            .ok_or_else(|| EngineError::UnknownProducer(producer_id.to_string()))?;
        if producer.router_id != router_id {
            return Err(EngineError::UnknownProducer(producer_id.to_string()));
        }

        let codecs = matching_codecs(&producer.codecs, rtp_capabilities);
        if codecs.is_empty() {
            return Err(EngineError::Rejected(format!(
                "cannot consume producer {producer_id}"
            )));
        }
        let kind = producer.kind;

        state.next_mid += 1;
        let mid = state.next_mid.to_string();
        let ssrc: u32 = rand::thread_rng().gen_range(100_000_000..=999_999_999);
        let id = Uuid::new_v4().to_string();

        state
            .consumers
            .insert(id.clone(), ConsumerEntry { router_id });

        Ok(ConsumerHandle {
            id: id.clone(),
            producer_id: producer_id.to_string(),
            transport_id: transport.id.clone(),
            kind,
            rtp_parameters: json!({
                "mid": mid,
                "codecs": codecs,
                "headerExtensions": [],
                "encodings": [{ "ssrc": ssrc }],
                "rtcp": { "cname": id, "reducedSize": true }
            }),
            paused,
        })
    }

    fn can_consume(
        &self,
        router: &RouterHandle,
        producer_id: &str,
        rtp_capabilities: &Value,
    ) -> bool {
        let state = self.state();
        match state.producers.get(producer_id) {
            Some(producer) if producer.router_id == router.id => {
                !matching_codecs(&producer.codecs, rtp_capabilities).is_empty()
            }
            _ => false,
        }
    }

    async fn close_room(&self, router: &RouterHandle) -> Result<(), EngineError> {
        let mut state = self.state();
        let Some(entry) = state.routers.remove(&router.id) else {
            // Already torn down
            return Ok(());
        };
        state.transports.retain(|_, t| t.router_id != router.id);
        state.producers.retain(|_, p| p.router_id != router.id);
        state.consumers.retain(|_, c| c.router_id != router.id);

        debug!(
            target: "signaling.engine",
            room_id = %entry.room_id,
            router_id = %router.id,
            "Router closed"
        );
        Ok(())
    }
}
