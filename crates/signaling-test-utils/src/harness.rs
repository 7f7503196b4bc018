//! Dispatcher and server harnesses.
//!
//! - `SignalingHarness` wires a registry and dispatcher to a `MockMediaEngine`
//!   and hands out `TestPeer`s, each one an in-memory connection.
//! - `TestSignalingServer` serves the real WebSocket router on a random port.

use crate::mock_engine::MockMediaEngine;
use serde_json::Value;
use signaling_service::actors::{ActorMetrics, RoomRegistryHandle};
use signaling_service::connection::{ConnectionHandle, ConnectionId};
use signaling_service::dispatcher::Dispatcher;
use signaling_service::engine::SharedMediaEngine;
use signaling_service::membership::DisconnectOutcome;
use signaling_service::protocol::ServerMessage;
use signaling_service::ws::{ws_router, WsState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long `TestPeer::recv` waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `TestPeer::assert_silent` listens.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(100);

/// Outbound queue capacity for test peers.
const PEER_BUFFER: usize = 64;

/// A registry and dispatcher backed by a mock engine.
pub struct SignalingHarness {
    pub dispatcher: Dispatcher,
    pub engine: Arc<MockMediaEngine>,
    pub metrics: Arc<ActorMetrics>,
}

impl SignalingHarness {
    /// Harness with an engine that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(MockMediaEngine::accepting())
    }

    #[must_use]
    pub fn with_engine(engine: Arc<MockMediaEngine>) -> Self {
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            "signaling-test".to_string(),
            engine.shared(),
            Arc::clone(&metrics),
        );
        Self {
            dispatcher: Dispatcher::new(registry, Arc::clone(&metrics)),
            engine,
            metrics,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        self.dispatcher.registry()
    }

    /// A new connected peer.
    #[must_use]
    pub fn peer(&self) -> TestPeer {
        self.peer_with_buffer(PEER_BUFFER)
    }

    /// A peer whose outbound queue holds only `buffer` messages.
    #[must_use]
    pub fn peer_with_buffer(&self, buffer: usize) -> TestPeer {
        let (handle, rx) = ConnectionHandle::channel(buffer);
        TestPeer {
            handle,
            rx,
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl Default for SignalingHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SignalingHarness {
    fn drop(&mut self) {
        self.dispatcher.registry().cancel();
    }
}

/// An in-memory connection driving the dispatcher.
pub struct TestPeer {
    handle: ConnectionHandle,
    rx: mpsc::Receiver<ServerMessage>,
    dispatcher: Dispatcher,
}

impl TestPeer {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Dispatch `payload` and wait for its handler to finish.
    pub async fn send(&self, payload: &str) {
        self.dispatcher.dispatch(&self.handle, payload).await;
    }

    /// Next outbound message. Panics on timeout.
    pub async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbound queue closed")
    }

    /// Next outbound message, as it would appear on the wire.
    pub async fn recv_json(&mut self) -> Value {
        let message = self.recv().await;
        serde_json::from_str(&message.to_json().expect("serializable"))
            .expect("valid JSON")
    }

    /// Next message, which must be an `error` with text `expected`.
    pub async fn expect_error(&mut self, expected: &str) {
        match self.recv().await {
            ServerMessage::Error { error } => assert_eq!(error, expected),
            other => panic!("expected error {expected:?}, got {other:?}"),
        }
    }

    /// Panics if anything arrives within `SILENCE_WINDOW`.
    pub async fn assert_silent(&mut self) {
        if let Ok(Some(message)) = tokio::time::timeout(SILENCE_WINDOW, self.rx.recv()).await {
            panic!("expected no message, got {message:?}");
        }
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Transport ID from a `transport-created` reply to `create-transport`.
    pub async fn create_transport(&mut self, room_id: &str) -> String {
        self.send(&crate::fixtures::create_transport(room_id)).await;
        match self.recv().await {
            ServerMessage::TransportCreated { params } => params.id,
            other => panic!("expected transport-created, got {other:?}"),
        }
    }

    /// Producer ID from a `produced` reply.
    pub async fn produce(
        &mut self,
        room_id: &str,
        transport_id: &str,
        kind: signaling_service::engine::MediaKind,
    ) -> String {
        self.send(&crate::fixtures::produce(room_id, transport_id, kind))
            .await;
        match self.recv().await {
            ServerMessage::Produced { id } => id,
            other => panic!("expected produced, got {other:?}"),
        }
    }

    /// Run disconnect cleanup for this peer.
    pub async fn disconnect(self) -> DisconnectOutcome {
        self.dispatcher.disconnect(self.handle.id()).await
    }
}

/// The WebSocket front end served on a random local port.
pub struct TestSignalingServer {
    addr: SocketAddr,
    registry: RoomRegistryHandle,
    server_task: JoinHandle<()>,
}

impl TestSignalingServer {
    /// Spawn the server with `engine`.
    pub async fn spawn(engine: SharedMediaEngine) -> Result<Self, anyhow::Error> {
        let metrics = ActorMetrics::new();
        let registry =
            RoomRegistryHandle::new("signaling-ws-test".to_string(), engine, Arc::clone(&metrics));
        let app = ws_router(WsState {
            dispatcher: Dispatcher::new(registry.clone(), metrics),
            outbound_buffer: PEER_BUFFER,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            registry,
            server_task: handle,
        })
    }

    /// WebSocket URL of the signaling endpoint.
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.registry
    }
}

impl Drop for TestSignalingServer {
    fn drop(&mut self) {
        self.server_task.abort();
        self.registry.cancel();
    }
}
