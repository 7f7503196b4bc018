//! `RoomActor` - per-room actor that owns a room's media bookkeeping.
//!
//! Each `RoomActor`:
//! - Owns the room's router handle and its transport, producer and consumer
//!   collections, keyed by engine-issued IDs
//! - Serializes every mutation and every engine call for its room, so a
//!   `consume` always observes a consistent producer set
//! - Creates its router once, on start; if that fails, the next command
//!   retries before doing anything else
//!
//! An engine failure aborts only the command that hit it and leaves no
//! partial entry behind: nothing is registered until the engine call returns.
//!
//! # Lifecycle
//!
//! 1. Spawned by the registry on the first `get_or_create` for a room ID
//! 2. Runs until `close()` tears it down, or its cancellation token fires
//!    (registry shutdown), which also tears down engine resources
//!
//! Producers are consumed in registration order.

use crate::connection::ConnectionHandle;
use crate::engine::{
    ConsumerHandle, EngineError, EngineOperation, MediaKind, ProducerHandle, RouterHandle,
    SharedMediaEngine, TransportHandle, TransportParams,
};
use crate::errors::SignalingError;
use crate::observability;
use crate::protocol::ServerMessage;

use super::messages::{RoomMessage, RoomSnapshot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Router RTP capabilities.
    pub async fn rtp_capabilities(&self) -> Result<Value, SignalingError> {
        self.request(|respond_to| RoomMessage::GetRtpCapabilities { respond_to })
            .await?
    }

    /// Create a WebRTC transport and return its connection parameters.
    pub async fn create_transport(&self) -> Result<TransportParams, SignalingError> {
        self.request(|respond_to| RoomMessage::CreateTransport { respond_to })
            .await?
    }

    /// Complete the DTLS exchange for `transport_id`.
    ///
    /// Fails with `TransportNotFound` if the transport is not registered in
    /// this room.
    pub async fn connect_transport(
        &self,
        transport_id: String,
        dtls_parameters: Value,
    ) -> Result<(), SignalingError> {
        self.request(|respond_to| RoomMessage::ConnectTransport {
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    /// Publish a track on `transport_id`. Returns the producer ID.
    pub async fn produce(
        &self,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, SignalingError> {
        self.request(|respond_to| RoomMessage::Produce {
            transport_id,
            kind,
            rtp_parameters,
            respond_to,
        })
        .await?
    }

    /// Consume every compatible producer on `transport_id`.
    ///
    /// Each `consumer-created` is forwarded to `connection` as soon as the
    /// consumer exists. The forwarding runs on the caller's task, so a peer
    /// that stops reading stalls only its own request, never the room.
    /// Returns how many consumers were created.
    pub async fn consume(
        &self,
        transport_id: String,
        rtp_capabilities: Value,
        connection: &ConnectionHandle,
    ) -> Result<usize, SignalingError> {
        let (replies, mut pending) = mpsc::unbounded_channel();
        let request = self.request(|respond_to| RoomMessage::Consume {
            transport_id,
            rtp_capabilities,
            replies,
            respond_to,
        });
        tokio::pin!(request);

        let result = loop {
            tokio::select! {
                Some(reply) = pending.recv() => {
                    if connection.send(reply).await.is_err() {
                        // Stops the actor creating consumers nobody will use
                        pending.close();
                    }
                }
                result = &mut request => break result,
            }
        };

        // Replies queued after the last forward but before the response
        while let Ok(reply) = pending.try_recv() {
            if connection.send(reply).await.is_err() {
                break;
            }
        }

        result?
    }

    /// Tear down the room's engine resources and stop the actor.
    pub async fn close(&self) -> Result<(), SignalingError> {
        self.request(|respond_to| RoomMessage::Close { respond_to })
            .await?
    }

    /// Get current room state.
    pub async fn get_state(&self) -> Result<RoomSnapshot, SignalingError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    /// Cancel the actor. Engine resources are torn down on the way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    engine: SharedMediaEngine,
    /// `None` until router creation succeeds, and again after teardown.
    router: Option<RouterHandle>,
    transports: HashMap<String, TransportHandle>,
    /// Registration order is the order `consume` visits producers in.
    producers: Vec<ProducerHandle>,
    consumers: HashMap<String, ConsumerHandle>,
    created_at: i64,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: String,
        engine: SharedMediaEngine,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Room, &room_id));

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            engine,
            router: None,
            transports: HashMap::new(),
            producers: Vec::new(),
            consumers: HashMap::new(),
            created_at: chrono::Utc::now().timestamp(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "signaling.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        // Eager router creation; commands retry if this fails
        let _ = self.ensure_router().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    let _ = self.teardown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let stop = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            observability::set_actor_mailbox_depth(
                                ActorType::Room.as_str(),
                                self.mailbox.current_depth(),
                            );
                            if stop {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "signaling.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Returns `true` when the actor should stop.
    async fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::GetRtpCapabilities { respond_to } => {
                let result = self
                    .ensure_router()
                    .await
                    .map(|router| router.rtp_capabilities);
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateTransport { respond_to } => {
                let result = self.create_transport().await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectTransport {
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self.connect_transport(&transport_id, dtls_parameters).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Produce {
                transport_id,
                kind,
                rtp_parameters,
                respond_to,
            } => {
                let result = self.produce(&transport_id, kind, rtp_parameters).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Consume {
                transport_id,
                rtp_capabilities,
                replies,
                respond_to,
            } => {
                let result = self
                    .consume(&transport_id, &rtp_capabilities, &replies)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Close { respond_to } => {
                let result = self.teardown().await;
                let _ = respond_to.send(result);
                return true;
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
        false
    }

    /// Return the router, creating it if no earlier attempt succeeded.
    async fn ensure_router(&mut self) -> Result<RouterHandle, SignalingError> {
        if let Some(router) = &self.router {
            return Ok(router.clone());
        }

        let router = self
            .engine
            .create_router(&self.room_id)
            .await
            .map_err(|e| engine_failure(&self.room_id, EngineOperation::CreateRouter, e))?;

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            router_id = %router.id,
            "Router created"
        );

        self.router = Some(router.clone());
        Ok(router)
    }

    async fn create_transport(&mut self) -> Result<TransportParams, SignalingError> {
        let router = self.ensure_router().await?;

        let (transport, params) = self
            .engine
            .create_transport(&router)
            .await
            .map_err(|e| engine_failure(&self.room_id, EngineOperation::CreateTransport, e))?;

        debug!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            transport_id = %transport.id,
            "Transport created"
        );

        self.transports.insert(transport.id.clone(), transport);
        Ok(params)
    }

    fn transport(&self, transport_id: &str) -> Result<TransportHandle, SignalingError> {
        self.transports
            .get(transport_id)
            .cloned()
            .ok_or_else(|| SignalingError::TransportNotFound(transport_id.to_string()))
    }

    async fn connect_transport(
        &mut self,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), SignalingError> {
        let transport = self.transport(transport_id)?;

        self.engine
            .connect_transport(&transport, dtls_parameters)
            .await
            .map_err(|e| engine_failure(&self.room_id, EngineOperation::ConnectTransport, e))?;

        debug!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            transport_id = %transport_id,
            "Transport connected"
        );
        Ok(())
    }

    async fn produce(
        &mut self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, SignalingError> {
        let transport = self.transport(transport_id)?;

        let producer = self
            .engine
            .produce(&transport, kind, rtp_parameters)
            .await
            .map_err(|e| engine_failure(&self.room_id, EngineOperation::Produce, e))?;

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            transport_id = %transport_id,
            producer_id = %producer.id,
            kind = %kind,
            "Producer created"
        );

        let id = producer.id.clone();
        self.producers.push(producer);
        Ok(id)
    }

    async fn consume(
        &mut self,
        transport_id: &str,
        rtp_capabilities: &Value,
        replies: &mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<usize, SignalingError> {
        let transport = self.transport(transport_id)?;
        let router = self.ensure_router().await?;

        let producer_ids: Vec<String> = self.producers.iter().map(|p| p.id.clone()).collect();
        let mut created = 0;

        for producer_id in producer_ids {
            if !self
                .engine
                .can_consume(&router, &producer_id, rtp_capabilities)
            {
                debug!(
                    target: "signaling.actor.room",
                    room_id = %self.room_id,
                    producer_id = %producer_id,
                    "Cannot consume producer, skipping"
                );
                continue;
            }

            let consumer = match self
                .engine
                .consume(&transport, &producer_id, rtp_capabilities, false)
                .await
            {
                Ok(consumer) => consumer,
                Err(e) => {
                    // The remaining producers still get a consumer
                    log_engine_failure(&self.room_id, EngineOperation::Consume, &e);
                    continue;
                }
            };

            let reply = ServerMessage::ConsumerCreated {
                id: consumer.id.clone(),
                producer_id: consumer.producer_id.clone(),
                kind: consumer.kind,
                rtp_parameters: consumer.rtp_parameters.clone(),
            };
            debug!(
                target: "signaling.actor.room",
                room_id = %self.room_id,
                transport_id = %transport_id,
                producer_id = %producer_id,
                consumer_id = %consumer.id,
                "Consumer created"
            );
            self.consumers.insert(consumer.id.clone(), consumer);
            created += 1;

            if replies.send(reply).is_err() {
                debug!(
                    target: "signaling.actor.room",
                    room_id = %self.room_id,
                    transport_id = %transport_id,
                    "Consumer connection gone, stopping consume"
                );
                break;
            }
        }

        Ok(created)
    }

    /// Release every engine resource held by the room.
    async fn teardown(&mut self) -> Result<(), SignalingError> {
        let transports = self.transports.len();
        let producers = self.producers.len();
        let consumers = self.consumers.len();
        self.transports.clear();
        self.producers.clear();
        self.consumers.clear();

        if let Some(router) = self.router.take() {
            self.engine
                .close_room(&router)
                .await
                .map_err(|e| engine_failure(&self.room_id, EngineOperation::CloseRoom, e))?;
        }

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            transports,
            producers,
            consumers,
            "Room torn down"
        );
        Ok(())
    }

    fn get_state(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            router_id: self.router.as_ref().map(|r| r.id.clone()),
            transport_ids: self.transports.keys().cloned().collect(),
            producer_ids: self.producers.iter().map(|p| p.id.clone()).collect(),
            consumer_ids: self.consumers.keys().cloned().collect(),
            created_at: self.created_at,
            mailbox_depth: self.mailbox.current_depth(),
            mailbox_peak: self.mailbox.peak_depth(),
        }
    }
}

/// Log and count an engine failure, converting it for the caller.
fn engine_failure(room_id: &str, operation: EngineOperation, error: EngineError) -> SignalingError {
    log_engine_failure(room_id, operation, &error);
    SignalingError::engine(operation, error)
}

fn log_engine_failure(room_id: &str, operation: EngineOperation, error: &EngineError) {
    warn!(
        target: "signaling.engine",
        room_id = %room_id,
        operation = operation.as_str(),
        error = %error,
        "Media engine call failed"
    );
    observability::record_engine_failure(operation.as_str());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::LocalMediaEngine;
    use serde_json::json;
    use std::time::Duration;

    fn spawn_room(room_id: &str) -> (RoomActorHandle, JoinHandle<()>, Arc<LocalMediaEngine>) {
        let engine = Arc::new(LocalMediaEngine::default());
        let shared: SharedMediaEngine = Arc::clone(&engine) as SharedMediaEngine;
        let (handle, task) = RoomActor::spawn(
            room_id.to_string(),
            shared,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        (handle, task, engine)
    }

    /// Serves as both producer RTP parameters and consumer capabilities.
    fn vp8_codecs() -> Value {
        json!({ "codecs": [{ "mimeType": "video/VP8", "clockRate": 90000 }] })
    }

    #[tokio::test]
    async fn test_room_actor_creates_router_once() {
        let (handle, _task, engine) = spawn_room("room-1");

        let caps = handle.rtp_capabilities().await.unwrap();
        let again = handle.rtp_capabilities().await.unwrap();

        assert_eq!(caps, again);
        assert_eq!(engine.stats().routers, 1);
        assert!(handle.get_state().await.unwrap().router_id.is_some());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_create_transport_registers_it() {
        let (handle, _task, _engine) = spawn_room("room-1");

        let params = handle.create_transport().await.unwrap();
        let state = handle.get_state().await.unwrap();

        assert_eq!(state.transport_ids, vec![params.id]);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_unknown_transport_rejected() {
        let (handle, _task, _engine) = spawn_room("room-1");

        let result = handle
            .produce("nope".to_string(), MediaKind::Video, vp8_codecs())
            .await;
        assert!(matches!(result, Err(SignalingError::TransportNotFound(ref id)) if id == "nope"));

        let result = handle
            .connect_transport("nope".to_string(), json!({}))
            .await;
        assert!(matches!(result, Err(SignalingError::TransportNotFound(_))));

        let state = handle.get_state().await.unwrap();
        assert!(state.producer_ids.is_empty());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_failed_produce_registers_nothing() {
        let (handle, _task, engine) = spawn_room("room-1");
        let transport = handle.create_transport().await.unwrap();

        // Audio kind with a video codec is rejected by the engine
        let result = handle
            .produce(transport.id, MediaKind::Audio, vp8_codecs())
            .await;
        assert!(matches!(result, Err(SignalingError::Engine { .. })));

        assert!(handle.get_state().await.unwrap().producer_ids.is_empty());
        assert_eq!(engine.stats().producers, 0);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_consume_sends_one_reply_per_producer() {
        let (handle, _task, _engine) = spawn_room("room-1");
        let send = handle.create_transport().await.unwrap();
        let recv = handle.create_transport().await.unwrap();

        let p1 = handle
            .produce(send.id.clone(), MediaKind::Video, vp8_codecs())
            .await
            .unwrap();
        let p2 = handle
            .produce(send.id, MediaKind::Video, vp8_codecs())
            .await
            .unwrap();

        let (connection, mut rx) = ConnectionHandle::channel(16);
        let created = handle
            .consume(recv.id, vp8_codecs(), &connection)
            .await
            .unwrap();
        assert_eq!(created, 2);

        let mut producer_ids = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                ServerMessage::ConsumerCreated { producer_id, .. } => {
                    producer_ids.push(producer_id);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
        // Registration order
        assert_eq!(producer_ids, vec![p1, p2]);
        assert_eq!(handle.get_state().await.unwrap().consumer_ids.len(), 2);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_unread_consumer_does_not_block_room() {
        let (handle, _task, _engine) = spawn_room("room-1");
        let send = handle.create_transport().await.unwrap();
        let recv = handle.create_transport().await.unwrap();
        for _ in 0..3 {
            handle
                .produce(send.id.clone(), MediaKind::Video, vp8_codecs())
                .await
                .unwrap();
        }

        // Queue of one that is never read
        let (connection, mut stalled_rx) = ConnectionHandle::channel(1);
        let stalled = tokio::spawn({
            let handle = handle.clone();
            async move { handle.consume(recv.id, vp8_codecs(), &connection).await }
        });

        // The room finishes the consume and keeps serving other commands
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.get_state().await.unwrap().consumer_ids.len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("room should stay responsive");
        let caps = tokio::time::timeout(Duration::from_secs(2), handle.rtp_capabilities())
            .await
            .expect("room should stay responsive")
            .unwrap();
        assert!(caps.get("codecs").is_some());
        assert!(!stalled.is_finished());

        // Once the peer reads, every reply arrives in order
        let mut received = 0;
        while received < 3 {
            match stalled_rx.recv().await {
                Some(ServerMessage::ConsumerCreated { .. }) => received += 1,
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(stalled.await.unwrap().unwrap(), 3);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_consume_with_no_compatible_producers() {
        let (handle, _task, _engine) = spawn_room("room-1");
        let send = handle.create_transport().await.unwrap();
        let recv = handle.create_transport().await.unwrap();
        handle
            .produce(send.id, MediaKind::Video, vp8_codecs())
            .await
            .unwrap();

        let (connection, mut rx) = ConnectionHandle::channel(16);
        let opus_only = json!({ "codecs": [{ "mimeType": "audio/opus", "clockRate": 48000 }] });
        let created = handle.consume(recv.id, opus_only, &connection).await.unwrap();

        assert_eq!(created, 0);
        assert!(rx.try_recv().is_err());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_tears_down_engine_and_stops() {
        let (handle, task, engine) = spawn_room("room-1");
        handle.create_transport().await.unwrap();

        handle.close().await.unwrap();
        task.await.unwrap();

        assert_eq!(engine.stats().routers, 0);
        assert_eq!(engine.stats().transports, 0);

        // Actor is gone
        assert!(matches!(
            handle.get_state().await,
            Err(SignalingError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_tears_down_engine() {
        let (handle, task, engine) = spawn_room("room-1");
        handle.rtp_capabilities().await.unwrap();

        handle.cancel();
        task.await.unwrap();

        assert!(handle.is_cancelled());
        assert_eq!(engine.stats().routers, 0);
    }
}
