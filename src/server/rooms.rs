use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, Mutex};

use crate::common::events::ServerEvent;

pub type ConnectionId = String;

/// In-memory multicast layer. A room is a membership map from connection
/// id to that connection's outbound event channel, keyed by the
/// canonicalized pair key. Rooms exist only while they have members and
/// are never consulted for message history.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<Mutex<HashMap<String, HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a room. Joining twice has no additional
    /// effect beyond refreshing the stored sender.
    pub async fn join(
        &self,
        room: &str,
        connection_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let mut rooms = self.inner.lock().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string(), sender);
        debug!("connection {} joined room {}", connection_id, room);
    }

    /// Removes a connection from a room, discarding the room when the
    /// last member leaves.
    pub async fn leave(&self, room: &str, connection_id: &str) {
        let mut rooms = self.inner.lock().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(connection_id);
            if members.is_empty() {
                rooms.remove(room);
                debug!("room {} emptied and discarded", room);
            }
        }
    }

    /// Removes a connection from every room it joined, returning the
    /// rooms it was a member of. Called on disconnect.
    pub async fn leave_all(&self, connection_id: &str) -> Vec<String> {
        let mut rooms = self.inner.lock().await;
        let mut left = Vec::new();
        rooms.retain(|room, members| {
            if members.remove(connection_id).is_some() {
                left.push(room.clone());
            }
            !members.is_empty()
        });
        left
    }

    /// Fans an event out to every connection currently in the room,
    /// including the originator's own other connections. Best-effort,
    /// at-most-once; an empty room is a normal condition, not an error.
    /// Returns the number of members the event was handed to.
    pub async fn publish(&self, room: &str, event: ServerEvent) -> usize {
        let rooms = self.inner.lock().await;
        let Some(members) = rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for sender in members.values() {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn member_count(&self, room: &str) -> usize {
        let rooms = self.inner.lock().await;
        rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}
