//! `RoomRegistryActor` - singleton owner of room lifetimes.
//!
//! - Singleton per service instance
//! - Maps room IDs to `RoomActor` instances and spawns them lazily
//! - Owns the root `CancellationToken`; every room gets a child token
//! - Monitors room actor health (panic detection via `JoinHandle`)
//!
//! Because all lookups go through one mailbox, `get_or_create` is atomic:
//! concurrent callers for the same room ID get the same `RoomActor`, and
//! therefore the same router.
//!
//! Closing a room unregisters it first and tears it down outside the registry
//! loop, so a slow engine teardown never blocks other rooms. A `get_or_create`
//! issued after the unregister gets a fresh room.

use crate::engine::SharedMediaEngine;
use crate::errors::SignalingError;
use crate::observability;

use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long a removed room actor gets to exit before a warning.
const ROOM_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for each room actor.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the `RoomRegistryActor`.
#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(instance_id: String, engine: SharedMediaEngine, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Registry, &instance_id));

        let actor = RoomRegistryActor {
            instance_id,
            receiver,
            cancel_token: cancel_token.clone(),
            engine,
            rooms: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    /// Return the room, creating it (and its router) on first use.
    pub async fn get_or_create(&self, room_id: &str) -> Result<RoomActorHandle, SignalingError> {
        let room_id = room_id.to_string();
        self.request(|respond_to| RegistryMessage::GetOrCreateRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Non-creating lookup.
    pub async fn get(&self, room_id: &str) -> Result<Option<RoomActorHandle>, SignalingError> {
        let room_id = room_id.to_string();
        self.request(|respond_to| RegistryMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await
    }

    /// Close a room: unregister it, then tear down its engine resources.
    ///
    /// Idempotent. Returns `false` when no such room was registered.
    pub async fn close_room(&self, room_id: &str) -> Result<bool, SignalingError> {
        let owned = room_id.to_string();
        let removed = self
            .request(|respond_to| RegistryMessage::RemoveRoom {
                room_id: owned,
                respond_to,
            })
            .await?;

        let Some(room) = removed else {
            debug!(
                target: "signaling.actor.registry",
                room_id = %room_id,
                "Close for unknown room ignored"
            );
            return Ok(false);
        };

        room.close().await?;
        Ok(true)
    }

    /// Get the current registry status.
    pub async fn get_status(&self) -> Result<RegistryStatus, SignalingError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop creating rooms and cancel every room actor.
    pub async fn shutdown(&self) -> Result<(), SignalingError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that should stop with the registry.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
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

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    /// Unix timestamp (seconds).
    created_at: i64,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    instance_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root cancellation token.
    cancel_token: CancellationToken,
    engine: SharedMediaEngine,
    rooms: HashMap<String, ManagedRoom>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomRegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "signaling.actor.registry", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "signaling.actor.registry",
            instance_id = %self.instance_id,
            "RoomRegistryActor started"
        );

        loop {
            // Reap room actors that exited on their own
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.actor.registry",
                        instance_id = %self.instance_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            observability::set_actor_mailbox_depth(
                                ActorType::Registry.as_str(),
                                self.mailbox.current_depth(),
                            );
                        }
                        None => {
                            info!(
                                target: "signaling.actor.registry",
                                instance_id = %self.instance_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signaling.actor.registry",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message. Never awaits a room actor.
    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create(room_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let handle = self.rooms.get(&room_id).map(|m| m.handle.clone());
                let _ = respond_to.send(handle);
            }

            RegistryMessage::RemoveRoom {
                room_id,
                respond_to,
            } => {
                let handle = self.remove_room(&room_id);
                let _ = respond_to.send(handle);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown { respond_to } => {
                info!(
                    target: "signaling.actor.registry",
                    instance_id = %self.instance_id,
                    room_count = self.rooms.len(),
                    "Initiating shutdown"
                );
                self.accepting_new = false;
                // Propagates to every room actor
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn get_or_create(&mut self, room_id: String) -> Result<RoomActorHandle, SignalingError> {
        if let Some(managed) = self.rooms.get(&room_id) {
            return Ok(managed.handle.clone());
        }

        if !self.accepting_new {
            return Err(SignalingError::Draining);
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            Arc::clone(&self.engine),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.room_created();
        observability::set_rooms_active(self.rooms.len());

        info!(
            target: "signaling.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(handle)
    }

    /// Unregister a room and watch its actor exit in the background.
    fn remove_room(&mut self, room_id: &str) -> Option<RoomActorHandle> {
        let managed = self.rooms.remove(room_id)?;

        self.metrics.room_removed();
        observability::set_rooms_active(self.rooms.len());

        let room_id_owned = room_id.to_string();
        let instance_id = self.instance_id.clone();
        let lifetime_secs = chrono::Utc::now().timestamp() - managed.created_at;
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_EXIT_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "signaling.actor.registry",
                        instance_id = %instance_id,
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "signaling.actor.registry",
                        instance_id = %instance_id,
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during close"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "signaling.actor.registry",
                        instance_id = %instance_id,
                        room_id = %room_id_owned,
                        "Room actor did not exit in time"
                    );
                }
            }
        });

        info!(
            target: "signaling.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            lifetime_secs,
            total_rooms = self.rooms.len(),
            "Room removed"
        );

        Some(managed.handle)
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
            mailbox_peak: self.mailbox.peak_depth(),
            mailbox_level: self.mailbox.current_level(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "signaling.actor.registry",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        // Already cancelled via the parent token, but be explicit
        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "signaling.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "signaling.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "signaling.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }
        observability::set_rooms_active(0);

        info!(
            target: "signaling.actor.registry",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop rooms whose actor task has finished without being closed.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            warn!(
                target: "signaling.actor.registry",
                instance_id = %self.instance_id,
                room_id = %room_id,
                "Room actor task finished unexpectedly"
            );

            if let Err(join_error) = managed.task_handle.await {
                if join_error.is_panic() {
                    error!(
                        target: "signaling.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                    self.metrics.record_panic(ActorType::Room);
                    observability::record_actor_panic(ActorType::Room.as_str());
                }
            }

            self.metrics.room_removed();
            observability::set_rooms_active(self.rooms.len());
        }
    }
}
