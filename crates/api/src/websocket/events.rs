//! WebSocket event types and serialization
//!
//! Client and server events are JSON objects tagged by `type`.

use learnhub_shared::ThreadId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::support::model::{MessageDto, RatingDto, ThreadDetail, ThreadSummary};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to a thread's topic
    Subscribe { thread_id: ThreadId },

    /// Unsubscribe from a thread's topic
    Unsubscribe { thread_id: ThreadId },

    /// Subscribe to the manager pool (managers only)
    SubscribeManagerPool,

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A student opened a new thread
    ThreadCreated { thread: Box<ThreadDetail> },

    /// A message was appended to a thread
    MessageAppended {
        thread_id: ThreadId,
        message: MessageDto,
    },

    /// Status, assignment or unread flags changed
    ThreadUpdated { thread: ThreadSummary },

    /// A closed thread received its rating
    ThreadRated {
        thread_id: ThreadId,
        rating: RatingDto,
    },

    /// The thread was handed to another manager
    ThreadTransferred { thread: ThreadSummary },

    /// Connection acknowledged
    Connected { session_id: Uuid },

    /// Subscription accepted
    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<ThreadId>,
        manager_pool: bool,
    },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    /// Event tag, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ThreadCreated { .. } => "thread_created",
            Self::MessageAppended { .. } => "message_appended",
            Self::ThreadUpdated { .. } => "thread_updated",
            Self::ThreadRated { .. } => "thread_rated",
            Self::ThreadTransferred { .. } => "thread_transferred",
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
