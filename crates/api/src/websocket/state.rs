//! Global WebSocket state management

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::room::RoomManager;

/// Global WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    pub rooms: Arc<RoomManager>,
}

impl WebSocketState {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
        }
    }

    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            user_id = conn.user_id,
            role = %conn.role,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection and leave every topic it subscribed to
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let removed = self.connections.write().await.remove(session_id);
        let Some(conn) = removed else {
            return;
        };

        let topics = conn.get_subscriptions().await;
        for topic in &topics {
            self.rooms.leave(topic, session_id).await;
        }

        let remaining_connections = self.connection_count().await;
        tracing::info!(
            session_id = %session_id,
            user_id = conn.user_id,
            rooms_left = topics.len(),
            remaining_connections = remaining_connections,
            "WebSocket connection removed"
        );
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            active_connections: self.connection_count().await,
            active_rooms: self.rooms.get_room_count().await,
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketStats {
    pub active_connections: usize,
    pub active_rooms: usize,
}
