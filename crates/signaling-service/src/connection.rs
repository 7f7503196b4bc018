//! Connection lifecycle.
//!
//! A connection is a bidirectional message channel with one peer. The
//! transport layer (see [`crate::ws`]) owns the socket; everything else only
//! sees a [`ConnectionHandle`]: a process-unique [`ConnectionId`] plus a
//! bounded outbound queue drained by the connection's writer task.
//!
//! [`ConnectionSession`] ties one connection to the dispatcher. Messages are
//! handled strictly in arrival order because the transport awaits
//! [`ConnectionSession::handle_text`] before reading the next frame, and
//! [`ConnectionSession::close`] runs membership cleanup only after the last
//! in-flight handler has returned.
//!
//! Two send paths exist:
//! - [`ConnectionHandle::send`] waits for queue capacity. Used for replies to
//!   the peer that asked.
//! - [`ConnectionHandle::notify`] never waits. Used for broadcasts to other
//!   peers, so one slow peer cannot stall another peer's handler. When the
//!   queue is full the notification is handed to a background task that
//!   waits for capacity; it is dropped only if the peer goes away.

use crate::dispatcher::Dispatcher;
use crate::errors::SignalingError;
use crate::membership::DisconnectOutcome;
use crate::observability;
use crate::protocol::ServerMessage;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Mint a fresh ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound side of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle and its outbound queue.
    ///
    /// `buffer` must be non-zero.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            Self {
                id: ConnectionId::next(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the peer's writer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a reply, waiting for capacity.
    pub async fn send(&self, message: ServerMessage) -> Result<(), SignalingError> {
        self.sender.send(message).await.map_err(|e| {
            observability::record_message_dropped("peer_gone");
            SignalingError::Internal(format!(
                "connection {} closed, dropped {}",
                self.id,
                e.0.message_type()
            ))
        })
    }

    /// Queue a notification without waiting.
    ///
    /// Returns `false` only if the connection is already closed. A full
    /// queue defers delivery to a spawned task, so this must be called from
    /// within a Tokio runtime.
    pub fn notify(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                debug!(
                    target: "signaling.ws",
                    connection_id = %self.id,
                    message_type = message.message_type(),
                    "Outbound queue full, deferring notification"
                );
                let sender = self.sender.clone();
                let id = self.id;
                tokio::spawn(async move {
                    if let Err(e) = sender.send(message).await {
                        warn!(
                            target: "signaling.ws",
                            connection_id = %id,
                            message_type = e.0.message_type(),
                            "Connection closed before deferred notification was delivered"
                        );
                        observability::record_message_dropped("peer_gone");
                    }
                });
                true
            }
            Err(TrySendError::Closed(message)) => {
                debug!(
                    target: "signaling.ws",
                    connection_id = %self.id,
                    message_type = message.message_type(),
                    "Connection closed, notification dropped"
                );
                observability::record_message_dropped("peer_gone");
                false
            }
        }
    }
}

/// One accepted connection bound to the dispatcher.
pub struct ConnectionSession {
    handle: ConnectionHandle,
    dispatcher: Dispatcher,
}

impl ConnectionSession {
    /// Register a new connection. The returned receiver feeds the writer task.
    #[must_use]
    pub fn open(dispatcher: Dispatcher, buffer: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (handle, receiver) = ConnectionHandle::channel(buffer);

        let metrics = dispatcher.metrics();
        metrics.connection_opened();
        observability::set_connections_active(metrics.connection_count());

        info!(
            target: "signaling.ws",
            connection_id = %handle.id(),
            "Connection opened"
        );

        (Self { handle, dispatcher }, receiver)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Handle one inbound text payload to completion.
    pub async fn handle_text(&self, payload: &str) {
        self.dispatcher.dispatch(&self.handle, payload).await;
    }

    /// Remove the connection from every room it joined.
    ///
    /// Never touches media resources: rooms stay open until `close-room`.
    pub async fn close(self) -> DisconnectOutcome {
        let outcome = self.dispatcher.disconnect(self.handle.id()).await;

        let metrics = self.dispatcher.metrics();
        metrics.connection_closed();
        observability::set_connections_active(metrics.connection_count());

        info!(
            target: "signaling.ws",
            connection_id = %self.handle.id(),
            rooms_left = outcome.rooms_left.len(),
            rooms_emptied = outcome.rooms_emptied.len(),
            "Connection closed"
        );

        outcome
    }
}
