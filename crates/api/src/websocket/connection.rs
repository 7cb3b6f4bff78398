//! WebSocket connection management
//!
//! Represents an active WebSocket connection with subscription tracking.

use learnhub_shared::{UserId, UserRole};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;
use super::room::Topic;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated user ID
    pub user_id: UserId,

    pub role: UserRole,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Topics this connection is subscribed to
    pub subscriptions: Arc<RwLock<HashSet<Topic>>>,
}

impl Connection {
    pub fn new(user_id: UserId, role: UserRole, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            role,
            sender,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Err if the connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Record a subscription; returns false if it already existed
    pub async fn subscribe(&self, topic: Topic) -> bool {
        let added = self.subscriptions.write().await.insert(topic);
        tracing::debug!(session_id = %self.session_id, topic = ?topic, added, "Subscribed to topic");
        added
    }

    pub async fn unsubscribe(&self, topic: Topic) -> bool {
        let removed = self.subscriptions.write().await.remove(&topic);
        tracing::debug!(session_id = %self.session_id, topic = ?topic, removed, "Unsubscribed from topic");
        removed
    }

    /// Topics to leave when the socket closes
    pub async fn get_subscriptions(&self) -> HashSet<Topic> {
        self.subscriptions.read().await.clone()
    }
}
