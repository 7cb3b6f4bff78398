//! Realtime gateway backed by the WebSocket rooms

use async_trait::async_trait;
use learnhub_shared::ThreadId;

use super::events::ServerEvent;
use super::room::Topic;
use super::state::WebSocketState;
use crate::support::model::{MessageDto, RatingDto, ThreadDetail, ThreadSummary};
use crate::support::RealtimeGateway;

/// Publishes support events to WebSocket subscribers
#[derive(Clone)]
pub struct WsRealtimeGateway {
    ws_state: WebSocketState,
}

impl WsRealtimeGateway {
    pub fn new(ws_state: WebSocketState) -> Self {
        Self { ws_state }
    }

    async fn publish(&self, topics: &[Topic], event: ServerEvent) {
        for topic in topics {
            self.ws_state.rooms.broadcast(topic, event.clone()).await;
        }
    }
}

#[async_trait]
impl RealtimeGateway for WsRealtimeGateway {
    async fn thread_created(&self, detail: &ThreadDetail) {
        let event = ServerEvent::ThreadCreated {
            thread: Box::new(detail.clone()),
        };
        self.publish(&[Topic::ManagerPool], event).await;
    }

    async fn message_appended(&self, thread_id: ThreadId, message: &MessageDto) {
        let event = ServerEvent::MessageAppended {
            thread_id,
            message: message.clone(),
        };
        self.publish(&[Topic::Thread(thread_id)], event).await;
    }

    async fn thread_updated(&self, summary: &ThreadSummary) {
        let event = ServerEvent::ThreadUpdated {
            thread: summary.clone(),
        };
        self.publish(&[Topic::Thread(summary.id), Topic::ManagerPool], event)
            .await;
    }

    async fn thread_rated(&self, thread_id: ThreadId, rating: &RatingDto) {
        let event = ServerEvent::ThreadRated {
            thread_id,
            rating: rating.clone(),
        };
        self.publish(&[Topic::Thread(thread_id), Topic::ManagerPool], event)
            .await;
    }

    async fn thread_transferred(&self, summary: &ThreadSummary) {
        let event = ServerEvent::ThreadTransferred {
            thread: summary.clone(),
        };
        self.publish(&[Topic::ManagerPool], event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Connection;
    use learnhub_shared::UserRole;
    use std::sync::Arc;
    use time::macros::datetime;
    use tokio::sync::mpsc;

    fn rating() -> RatingDto {
        RatingDto {
            id: 1,
            rating: 5,
            comment: None,
            created_at: datetime!(2026-03-01 09:00 UTC),
        }
    }

    #[tokio::test]
    async fn test_rating_reaches_thread_and_pool() {
        let ws_state = WebSocketState::new();
        let gateway = WsRealtimeGateway::new(ws_state.clone());

        let (tx_student, mut rx_student) = mpsc::unbounded_channel();
        let (tx_manager, mut rx_manager) = mpsc::unbounded_channel();
        let (tx_other, mut rx_other) = mpsc::unbounded_channel();
        let student = Arc::new(Connection::new(1, UserRole::Student, tx_student));
        let manager = Arc::new(Connection::new(2, UserRole::Manager, tx_manager));
        let other = Arc::new(Connection::new(3, UserRole::Student, tx_other));

        ws_state.rooms.join(Topic::Thread(10), student).await;
        ws_state.rooms.join(Topic::ManagerPool, manager).await;
        ws_state.rooms.join(Topic::Thread(11), other).await;

        gateway.thread_rated(10, &rating()).await;

        assert_eq!(rx_student.try_recv().map(|e| e.kind()), Ok("thread_rated"));
        assert_eq!(rx_manager.try_recv().map(|e| e.kind()), Ok("thread_rated"));
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let gateway = WsRealtimeGateway::new(WebSocketState::new());
        gateway.thread_rated(10, &rating()).await;
    }
}
