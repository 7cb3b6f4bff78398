//! Topic rooms for pub/sub
//!
//! Every thread has its own topic; managers additionally share one pool topic.

use learnhub_shared::ThreadId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Thread(ThreadId),
    ManagerPool,
}

/// Manages topic rooms for broadcasting events
pub struct RoomManager {
    /// Map of topic -> list of connections
    rooms: Arc<RwLock<HashMap<Topic, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a room; a session joins a room at most once
    pub async fn join(&self, topic: Topic, conn: Arc<Connection>) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(topic).or_default();
        if !members.iter().any(|c| c.session_id == conn.session_id) {
            members.push(Arc::clone(&conn));
        }

        tracing::debug!(
            topic = ?topic,
            session_id = %conn.session_id,
            room_size = members.len(),
            "Connection joined room"
        );
    }

    pub async fn leave(&self, topic: &Topic, session_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(conns) = rooms.get_mut(topic) {
            conns.retain(|c| c.session_id != *session_id);

            if conns.is_empty() {
                rooms.remove(topic);
                tracing::debug!(topic = ?topic, "Removed empty room");
            } else {
                tracing::debug!(
                    topic = ?topic,
                    session_id = %session_id,
                    room_size = conns.len(),
                    "Connection left room"
                );
            }
        }
    }

    /// Send an event to every connection in a room and return how many got it
    ///
    /// Send errors are ignored; closed connections are cleaned up on disconnect.
    pub async fn broadcast(&self, topic: &Topic, event: ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(topic) else {
            tracing::trace!(topic = ?topic, event_type = event.kind(), "No subscribers");
            return 0;
        };

        let mut delivered = 0;
        for conn in conns {
            match conn.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            topic = ?topic,
            event_type = event.kind(),
            recipients = delivered,
            failed = conns.len() - delivered,
            "Broadcast event to room"
        );
        delivered
    }

    pub async fn get_room_size(&self, topic: &Topic) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(topic).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
