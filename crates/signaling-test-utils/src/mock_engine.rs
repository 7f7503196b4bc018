//! Mock media engine for signaling tests.
//!
//! Provides a `MediaEngine` that can be configured to:
//! - Reject transport creation, DTLS connects, produce or consume calls
//! - Deny `can_consume` for specific producers or track kinds
//! - Delay router creation (to widen race windows)
//!
//! IDs are sequential and predictable: routers `r1, r2, ...`, transports
//! `t1, ...`, producers `p1, ...`, consumers `c1, ...`. Every call is recorded
//! in a call log.
//!
//! # Example
//!
//! ```rust,ignore
//! use signaling_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::builder()
//!     .deny_consume_of("p2")
//!     .build();
//!
//! // Hand `engine.shared()` to a `RoomRegistryHandle`...
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use signaling_service::engine::{
    ConsumerHandle, EngineError, MediaEngine, MediaKind, ProducerHandle, RouterHandle,
    SharedMediaEngine, TransportHandle, TransportParams,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    next_id: HashMap<&'static str, u64>,
    routers: HashMap<String, String>,
    transports: HashMap<String, String>,
    connected: HashSet<String>,
    producers: HashMap<String, (String, MediaKind)>,
    consumers: HashMap<String, String>,
    routers_created: usize,
    closed_routers: Vec<String>,
    calls: Vec<String>,
}

impl MockState {
    fn mint(&mut self, prefix: &'static str) -> String {
        let next = self.next_id.entry(prefix).or_insert(0);
        *next += 1;
        format!("{prefix}{next}")
    }
}

/// Scriptable in-memory `MediaEngine`.
#[derive(Debug, Default)]
pub struct MockMediaEngine {
    reject_transports: bool,
    reject_connect: bool,
    reject_produce: bool,
    reject_consume: bool,
    deny_consume_producers: HashSet<String>,
    deny_consume_kinds: HashSet<MediaKind>,
    router_delay: Option<Duration>,
    state: Mutex<MockState>,
}

impl MockMediaEngine {
    /// Create a new `MockMediaEngine` builder.
    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    /// An engine that accepts everything.
    #[must_use]
    pub fn accepting() -> Arc<Self> {
        Self::builder().build()
    }

    /// This engine as the trait object the service expects.
    #[must_use]
    pub fn shared(self: &Arc<Self>) -> SharedMediaEngine {
        Arc::clone(self) as SharedMediaEngine
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Total routers ever created.
    #[must_use]
    pub fn routers_created(&self) -> usize {
        self.state().routers_created
    }

    /// Routers that are not closed.
    #[must_use]
    pub fn live_routers(&self) -> usize {
        self.state().routers.len()
    }

    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.state().transports.len()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.state().producers.len()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.state().consumers.len()
    }

    /// Router IDs passed to `close_room`, in order.
    #[must_use]
    pub fn closed_routers(&self) -> Vec<String> {
        self.state().closed_routers.clone()
    }

    /// Every engine call as `"<operation> <subject>"`, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of recorded calls whose operation is `operation`.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    fn router_of_transport(&self, transport_id: &str) -> Option<String> {
        self.state().transports.get(transport_id).cloned()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_router(&self, room_id: &str) -> Result<RouterHandle, EngineError> {
        if let Some(delay) = self.router_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.calls.push(format!("create_router {room_id}"));
        let id = state.mint("r");
        state.routers.insert(id.clone(), room_id.to_string());
        state.routers_created += 1;

        Ok(RouterHandle {
            id,
            room_id: room_id.to_string(),
            rtp_capabilities: json!({
                "codecs": [
                    { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                    { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
                ],
                "headerExtensions": []
            }),
        })
    }

    async fn create_transport(
        &self,
        router: &RouterHandle,
    ) -> Result<(TransportHandle, TransportParams), EngineError> {
        let mut state = self.state();
        state.calls.push(format!("create_transport {}", router.id));
        if self.reject_transports {
            return Err(EngineError::Unavailable("no ports left".to_string()));
        }
        if !state.routers.contains_key(&router.id) {
            return Err(EngineError::UnknownRouter(router.id.clone()));
        }

        let id = state.mint("t");
        state.transports.insert(id.clone(), router.id.clone());

        let params = TransportParams {
            id: id.clone(),
            ice_parameters: json!({ "usernameFragment": format!("ufrag-{id}"), "password": "secret" }),
            ice_candidates: json!([{ "ip": "127.0.0.1", "port": 40000, "protocol": "udp" }]),
            dtls_parameters: json!({ "role": "auto", "fingerprints": [] }),
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
        _dtls_parameters: Value,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(format!("connect_transport {}", transport.id));
        if self.reject_connect {
            return Err(EngineError::Rejected("bad fingerprint".to_string()));
        }
        if !state.transports.contains_key(&transport.id) {
            return Err(EngineError::UnknownTransport(transport.id.clone()));
        }
        state.connected.insert(transport.id.clone());
        Ok(())
    }

    async fn produce(
        &self,
        transport: &TransportHandle,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerHandle, EngineError> {
        let mut state = self.state();
        state.calls.push(format!("produce {}", transport.id));
        if self.reject_produce {
            return Err(EngineError::Rejected("unsupported codec".to_string()));
        }
        if !state.transports.contains_key(&transport.id) {
            return Err(EngineError::UnknownTransport(transport.id.clone()));
        }

        let id = state.mint("p");
        state
            .producers
            .insert(id.clone(), (transport.router_id.clone(), kind));
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
        _rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerHandle, EngineError> {
        let mut state = self.state();
        state
            .calls
            .push(format!("consume {}:{producer_id}", transport.id));
        if self.reject_consume {
            return Err(EngineError::Rejected("consumer limit".to_string()));
        }
        let Some((_, kind)) = state.producers.get(producer_id).cloned() else {
            return Err(EngineError::UnknownProducer(producer_id.to_string()));
        };

        let id = state.mint("c");
        state.consumers.insert(id.clone(), transport.router_id.clone());
        Ok(ConsumerHandle {
            rtp_parameters: json!({ "mid": id, "codecs": [] }),
            id,
            producer_id: producer_id.to_string(),
            transport_id: transport.id.clone(),
            kind,
            paused,
        })
    }

    fn can_consume(
        &self,
        router: &RouterHandle,
        producer_id: &str,
        _rtp_capabilities: &Value,
    ) -> bool {
        if self.deny_consume_producers.contains(producer_id) {
            return false;
        }
        let state = self.state();
        state
            .producers
            .get(producer_id)
            .is_some_and(|(router_id, kind)| {
                *router_id == router.id && !self.deny_consume_kinds.contains(kind)
            })
    }

    async fn close_room(&self, router: &RouterHandle) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(format!("close_room {}", router.id));
        state.closed_routers.push(router.id.clone());
        state.routers.remove(&router.id);
        state.transports.retain(|_, router_id| *router_id != router.id);
        state.producers.retain(|_, (router_id, _)| *router_id != router.id);
        state.consumers.retain(|_, router_id| *router_id != router.id);
        Ok(())
    }
}

/// Builder for `MockMediaEngine` configuration.
#[derive(Debug, Default)]
pub struct MockMediaEngineBuilder {
    engine: MockMediaEngine,
}

impl MockMediaEngineBuilder {
    /// Fail every `create_transport`.
    #[must_use]
    pub fn reject_transports(mut self) -> Self {
        self.engine.reject_transports = true;
        self
    }

    /// Fail every `connect_transport`.
    #[must_use]
    pub fn reject_connect(mut self) -> Self {
        self.engine.reject_connect = true;
        self
    }

    /// Fail every `produce`.
    #[must_use]
    pub fn reject_produce(mut self) -> Self {
        self.engine.reject_produce = true;
        self
    }

    /// Fail every `consume` (after `can_consume` passed).
    #[must_use]
    pub fn reject_consume(mut self) -> Self {
        self.engine.reject_consume = true;
        self
    }

    /// Report `producer_id` as not consumable.
    #[must_use]
    pub fn deny_consume_of(mut self, producer_id: &str) -> Self {
        self.engine
            .deny_consume_producers
            .insert(producer_id.to_string());
        self
    }

    /// Report every producer of `kind` as not consumable.
    #[must_use]
    pub fn deny_consume_kind(mut self, kind: MediaKind) -> Self {
        self.engine.deny_consume_kinds.insert(kind);
        self
    }

    /// Sleep this long inside every `create_router`.
    #[must_use]
    pub fn with_router_delay(mut self, delay: Duration) -> Self {
        self.engine.router_delay = Some(delay);
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> Arc<MockMediaEngine> {
        Arc::new(self.engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let engine = MockMediaEngine::accepting();
        let router = engine.create_router("room-1").await.unwrap();
        let (t1, _) = engine.create_transport(&router).await.unwrap();
        let (t2, _) = engine.create_transport(&router).await.unwrap();

        assert_eq!(router.id, "r1");
        assert_eq!(t1.id, "t1");
        assert_eq!(t2.id, "t2");
        assert_eq!(engine.call_count("create_transport"), 2);
    }

    #[tokio::test]
    async fn test_deny_consume_of_producer() {
        let engine = MockMediaEngine::builder().deny_consume_of("p1").build();
        let router = engine.create_router("room-1").await.unwrap();
        let (transport, _) = engine.create_transport(&router).await.unwrap();
        engine
            .produce(&transport, MediaKind::Audio, json!({}))
            .await
            .unwrap();
        engine
            .produce(&transport, MediaKind::Video, json!({}))
            .await
            .unwrap();

        assert!(!engine.can_consume(&router, "p1", &json!({})));
        assert!(engine.can_consume(&router, "p2", &json!({})));
    }

    #[tokio::test]
    async fn test_close_room_drops_router_objects() {
        let engine = MockMediaEngine::accepting();
        let router = engine.create_router("room-1").await.unwrap();
        let (transport, _) = engine.create_transport(&router).await.unwrap();
        engine
            .produce(&transport, MediaKind::Audio, json!({}))
            .await
            .unwrap();

        engine.close_room(&router).await.unwrap();

        assert_eq!(engine.live_routers(), 0);
        assert_eq!(engine.transport_count(), 0);
        assert_eq!(engine.producer_count(), 0);
        assert_eq!(engine.closed_routers(), vec!["r1".to_string()]);
    }
}
