//! Room membership index.
//!
//! Tracks which connections belong to which rooms, in both directions, behind
//! a single lock so the two views never diverge. Membership is independent of
//! media state: a connection joins a room by sending any message naming it,
//! and leaving (disconnect) never closes the room's media resources.

use crate::connection::{ConnectionHandle, ConnectionId};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct MembershipState {
    /// room id -> members
    rooms: HashMap<String, HashMap<ConnectionId, ConnectionHandle>>,
    /// connection -> room ids
    connections: HashMap<ConnectionId, HashSet<String>>,
}

/// Result of removing a connection from every room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectOutcome {
    /// Rooms the connection was a member of.
    pub rooms_left: Vec<String>,
    /// Rooms whose membership entry was dropped because it became empty.
    pub rooms_emptied: Vec<String>,
}

/// Bidirectional room/connection membership index.
#[derive(Debug, Clone, Default)]
pub struct MembershipIndex {
    inner: Arc<Mutex<MembershipState>>,
}

impl MembershipIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `room_id`. Idempotent; returns whether it was new.
    pub async fn join(&self, room_id: &str, connection: &ConnectionHandle) -> bool {
        let mut state = self.inner.lock().await;
        let id = connection.id();

        let joined = state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(id, connection.clone())
            .is_none();
        state
            .connections
            .entry(id)
            .or_default()
            .insert(room_id.to_string());

        if joined {
            debug!(
                target: "signaling.membership",
                room_id = %room_id,
                connection_id = %id,
                "Connection joined room"
            );
        }
        joined
    }

    /// Members of `room_id` other than `exclude`.
    pub async fn members_except(
        &self,
        room_id: &str,
        exclude: ConnectionId,
    ) -> Vec<ConnectionHandle> {
        let state = self.inner.lock().await;
        state
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|(id, _)| **id != exclude)
                    .map(|(_, handle)| handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// IDs of every member of `room_id`.
    pub async fn members(&self, room_id: &str) -> Vec<ConnectionId> {
        let state = self.inner.lock().await;
        state
            .rooms
            .get(room_id)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms `connection_id` belongs to.
    pub async fn rooms_of(&self, connection_id: ConnectionId) -> Vec<String> {
        let state = self.inner.lock().await;
        state
            .connections
            .get(&connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_member(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        let state = self.inner.lock().await;
        state
            .rooms
            .get(room_id)
            .is_some_and(|members| members.contains_key(&connection_id))
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    /// Drop every membership record for `room_id`. Returns the evicted members.
    pub async fn evict_room(&self, room_id: &str) -> Vec<ConnectionId> {
        let mut state = self.inner.lock().await;
        let Some(members) = state.rooms.remove(room_id) else {
            return Vec::new();
        };

        let evicted: Vec<ConnectionId> = members.into_keys().collect();
        for id in &evicted {
            if let Some(rooms) = state.connections.get_mut(id) {
                rooms.remove(room_id);
                if rooms.is_empty() {
                    state.connections.remove(id);
                }
            }
        }

        debug!(
            target: "signaling.membership",
            room_id = %room_id,
            evicted = evicted.len(),
            "Room membership evicted"
        );
        evicted
    }

    /// Remove `connection_id` from every room, dropping rooms left empty.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> DisconnectOutcome {
        let mut state = self.inner.lock().await;
        let Some(rooms) = state.connections.remove(&connection_id) else {
            return DisconnectOutcome::default();
        };

        let mut outcome = DisconnectOutcome::default();
        for room_id in rooms {
            let emptied = match state.rooms.get_mut(&room_id) {
                Some(members) => {
                    members.remove(&connection_id);
                    members.is_empty()
                }
                None => false,
            };
            if emptied {
                state.rooms.remove(&room_id);
                outcome.rooms_emptied.push(room_id.clone());
            }
            outcome.rooms_left.push(room_id);
        }

        debug!(
            target: "signaling.membership",
            connection_id = %connection_id,
            rooms_left = outcome.rooms_left.len(),
            rooms_emptied = outcome.rooms_emptied.len(),
            "Connection removed from rooms"
        );
        outcome
    }
}
