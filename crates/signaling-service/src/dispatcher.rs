//! Message dispatcher.
//!
//! Turns one inbound text payload into registry/room calls and replies:
//!
//! 1. Parse the JSON envelope. Malformed payloads are logged and dropped.
//! 2. Require `roomId`, else reply `"No room ID provided"`.
//! 3. Register the sender as a member of the room, for every message that got
//!    this far, including unknown types and bad bodies.
//! 4. Decode the typed message and route it.
//!
//! Lookup failures produce exactly one `error` reply. Engine failures are
//! logged and counted but never answered. No failure closes the connection.

use crate::actors::{ActorMetrics, RoomActorHandle, RoomRegistryHandle};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::errors::SignalingError;
use crate::membership::{DisconnectOutcome, MembershipIndex};
use crate::observability;
use crate::protocol::{self, ClientMessage, ServerMessage};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Routes inbound messages for every connection.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: RoomRegistryHandle,
    membership: MembershipIndex,
    metrics: Arc<ActorMetrics>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: RoomRegistryHandle, metrics: Arc<ActorMetrics>) -> Self {
        Self {
            registry,
            membership: MembershipIndex::new(),
            metrics,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.registry
    }

    #[must_use]
    pub fn membership(&self) -> &MembershipIndex {
        &self.membership
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Handle one inbound payload from `connection` to completion.
    pub async fn dispatch(&self, connection: &ConnectionHandle, payload: &str) {
        let start = Instant::now();

        let envelope = match protocol::parse_envelope(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    target: "signaling.dispatch",
                    connection_id = %connection.id(),
                    error = %e,
                    "Dropping malformed message"
                );
                observability::record_message_dropped("malformed");
                return;
            }
        };

        let Some(room_id) = envelope.room_id.clone() else {
            debug!(
                target: "signaling.dispatch",
                connection_id = %connection.id(),
                message_type = ?envelope.message_type,
                "Message without room ID"
            );
            self.fail(connection, SignalingError::MissingRoomId).await;
            return;
        };

        self.membership.join(&room_id, connection).await;

        let raw_type = envelope.message_type.clone();
        let message = match envelope.into_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    target: "signaling.dispatch",
                    connection_id = %connection.id(),
                    room_id = %room_id,
                    error = %e,
                    "Dropping message with invalid body"
                );
                observability::record_message_dropped("invalid_body");
                return;
            }
        };

        if message == ClientMessage::Unknown {
            debug!(
                target: "signaling.dispatch",
                connection_id = %connection.id(),
                room_id = %room_id,
                message_type = ?raw_type,
                "Ignoring unknown message type"
            );
            return;
        }

        let message_type = message.message_type();
        let result = self.route(connection, &room_id, message).await;
        observability::record_message(message_type, start.elapsed());

        if let Err(e) = result {
            if !e.is_reportable() {
                warn!(
                    target: "signaling.dispatch",
                    connection_id = %connection.id(),
                    room_id = %room_id,
                    message_type,
                    error = %e,
                    "Message failed"
                );
            }
            self.fail(connection, e).await;
        }
    }

    /// Remove a closed connection from every room. Media state is untouched.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> DisconnectOutcome {
        self.membership.disconnect(connection_id).await
    }

    async fn route(
        &self,
        connection: &ConnectionHandle,
        room_id: &str,
        message: ClientMessage,
    ) -> Result<(), SignalingError> {
        match message {
            ClientMessage::GetRtpCapabilities => {
                let room = self.registry.get_or_create(room_id).await?;
                let rtp_capabilities = room.rtp_capabilities().await?;
                connection
                    .send(ServerMessage::RtpCapabilities { rtp_capabilities })
                    .await
            }

            ClientMessage::CreateTransport => {
                let room = self.registry.get_or_create(room_id).await?;
                let params = room.create_transport().await?;
                debug!(
                    target: "signaling.dispatch",
                    connection_id = %connection.id(),
                    room_id = %room_id,
                    transport_id = %params.id,
                    "Transport created"
                );
                connection
                    .send(ServerMessage::TransportCreated { params })
                    .await
            }

            ClientMessage::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                let room = self.existing_room(room_id).await?;
                room.connect_transport(transport_id, dtls_parameters).await
            }

            ClientMessage::Produce {
                transport_id,
                kind,
                rtp_parameters,
            } => {
                let room = self.existing_room(room_id).await?;
                let id = room.produce(transport_id, kind, rtp_parameters).await?;
                connection.send(ServerMessage::Produced { id }).await
            }

            ClientMessage::Consume {
                transport_id,
                rtp_capabilities,
            } => {
                let room = self.existing_room(room_id).await?;
                let created = room
                    .consume(transport_id, rtp_capabilities, connection)
                    .await?;
                debug!(
                    target: "signaling.dispatch",
                    connection_id = %connection.id(),
                    room_id = %room_id,
                    consumers = created,
                    "Consume complete"
                );
                Ok(())
            }

            ClientMessage::CloseRoom => self.close_room(connection, room_id).await,

            ClientMessage::Unknown => Ok(()),
        }
    }

    async fn existing_room(&self, room_id: &str) -> Result<RoomActorHandle, SignalingError> {
        self.registry
            .get(room_id)
            .await?
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))
    }

    /// Notify the other members, then destroy the room and its membership.
    async fn close_room(
        &self,
        connection: &ConnectionHandle,
        room_id: &str,
    ) -> Result<(), SignalingError> {
        let others = self.membership.members_except(room_id, connection.id()).await;
        let mut notified = 0;
        for peer in &others {
            if peer.notify(ServerMessage::StreamStopped) {
                notified += 1;
            } else {
                self.metrics.record_outbound_drop();
            }
        }

        let closed = self.registry.close_room(room_id).await;
        let evicted = self.membership.evict_room(room_id).await;

        info!(
            target: "signaling.dispatch",
            connection_id = %connection.id(),
            room_id = %room_id,
            notified,
            evicted = evicted.len(),
            existed = matches!(closed, Ok(true)),
            "Room closed"
        );

        closed.map(|_| ())
    }

    /// Count a failure and reply when the protocol has a reply for it.
    async fn fail(&self, connection: &ConnectionHandle, error: SignalingError) {
        observability::record_error(error.error_type_label());
        if !error.is_reportable() {
            return;
        }

        let reply = ServerMessage::Error {
            error: error.client_message(),
        };
        if let Err(e) = connection.send(reply).await {
            debug!(
                target: "signaling.dispatch",
                connection_id = %connection.id(),
                error = %e,
                "Could not deliver error reply"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::{LocalMediaEngine, SharedMediaEngine};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn dispatcher() -> (Dispatcher, Arc<LocalMediaEngine>) {
        let engine = Arc::new(LocalMediaEngine::default());
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            "sig-dispatch-test".to_string(),
            Arc::clone(&engine) as SharedMediaEngine,
            Arc::clone(&metrics),
        );
        (Dispatcher::new(registry, metrics), engine)
    }

    async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for reply")
            .expect("connection closed")
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_silently() {
        let (dispatcher, _engine) = dispatcher();
        let (conn, mut rx) = ConnectionHandle::channel(8);

        dispatcher.dispatch(&conn, "{not json").await;
        dispatcher.dispatch(&conn, "[1, 2, 3]").await;

        assert!(rx.try_recv().is_err());
        assert!(dispatcher.membership().rooms_of(conn.id()).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_room_id_replies_error() {
        let (dispatcher, _engine) = dispatcher();
        let (conn, mut rx) = ConnectionHandle::channel(8);

        for payload in [
            json!({"type": "get-rtp-capabilities"}),
            json!({"type": "get-rtp-capabilities", "roomId": ""}),
            json!({"type": "get-rtp-capabilities", "roomId": null}),
            json!({"type": "get-rtp-capabilities", "roomId": 7}),
        ] {
            dispatcher.dispatch(&conn, &payload.to_string()).await;
            assert_eq!(
                next(&mut rx).await,
                ServerMessage::Error {
                    error: "No room ID provided".to_string()
                }
            );
        }
        assert_eq!(dispatcher.registry().get_status().await.unwrap().room_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_type_joins_room_without_reply() {
        let (dispatcher, _engine) = dispatcher();
        let (conn, mut rx) = ConnectionHandle::channel(8);

        let payload = json!({"type": "wave", "roomId": "room-1"}).to_string();
        dispatcher.dispatch(&conn, &payload).await;

        assert!(rx.try_recv().is_err());
        assert!(dispatcher.membership().is_member("room-1", conn.id()).await);
        assert!(dispatcher.registry().get("room-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_body_is_dropped_but_joins() {
        let (dispatcher, _engine) = dispatcher();
        let (conn, mut rx) = ConnectionHandle::channel(8);

        let payload = json!({
            "type": "produce",
            "roomId": "room-1",
            "transportId": "t",
            "kind": "hologram",
        })
        .to_string();
        dispatcher.dispatch(&conn, &payload).await;

        assert!(rx.try_recv().is_err());
        assert!(dispatcher.membership().is_member("room-1", conn.id()).await);
    }

    #[tokio::test]
    async fn test_capabilities_creates_room() {
        let (dispatcher, engine) = dispatcher();
        let (conn, mut rx) = ConnectionHandle::channel(8);

        let payload = json!({"type": "get-rtp-capabilities", "roomId": "room-1"}).to_string();
        dispatcher.dispatch(&conn, &payload).await;

        let ServerMessage::RtpCapabilities { rtp_capabilities } = next(&mut rx).await else {
            panic!("expected rtp-capabilities");
        };
        assert!(rtp_capabilities.get("codecs").is_some_and(Value::is_array));
        assert_eq!(engine.stats().routers, 1);
    }

    #[tokio::test]
    async fn test_connect_transport_on_missing_room() {
        let (dispatcher, _engine) = dispatcher();
        let (conn, mut rx) = ConnectionHandle::channel(8);

        let payload = json!({
            "type": "connect-transport",
            "roomId": "nowhere",
            "transportId": "t1",
            "dtlsParameters": {"fingerprints": []},
        })
        .to_string();
        dispatcher.dispatch(&conn, &payload).await;

        assert_eq!(
            next(&mut rx).await,
            ServerMessage::Error {
                error: "Room not found".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(dispatcher.registry().get("nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_unknown_room_is_silent() {
        let (dispatcher, _engine) = dispatcher();
        let (conn, mut rx) = ConnectionHandle::channel(8);

        let payload = json!({"type": "close-room", "roomId": "room-1"}).to_string();
        dispatcher.dispatch(&conn, &payload).await;

        assert!(rx.try_recv().is_err());
        assert!(dispatcher.membership().members("room-1").await.is_empty());
    }
}
