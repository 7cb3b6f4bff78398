//! Outbound realtime events
//!
//! The service calls these after a commit. Implementations deliver to whoever
//! is subscribed right now and swallow their own failures.

use async_trait::async_trait;
use learnhub_shared::ThreadId;

use super::model::{MessageDto, RatingDto, ThreadDetail, ThreadSummary};

#[async_trait]
pub trait RealtimeGateway: Send + Sync {
    /// A student opened a thread (manager pool)
    async fn thread_created(&self, detail: &ThreadDetail);

    /// A message was appended (thread topic)
    async fn message_appended(&self, thread_id: ThreadId, message: &MessageDto);

    /// Status, assignment or unread flags changed (thread topic and manager pool)
    async fn thread_updated(&self, summary: &ThreadSummary);

    /// The student rated a closed thread (thread topic and manager pool)
    async fn thread_rated(&self, thread_id: ThreadId, rating: &RatingDto);

    /// The thread moved to another manager (manager pool)
    async fn thread_transferred(&self, summary: &ThreadSummary);
}

/// Gateway that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGateway;

#[async_trait]
impl RealtimeGateway for NoopGateway {
    async fn thread_created(&self, _detail: &ThreadDetail) {}
    async fn message_appended(&self, _thread_id: ThreadId, _message: &MessageDto) {}
    async fn thread_updated(&self, _summary: &ThreadSummary) {}
    async fn thread_rated(&self, _thread_id: ThreadId, _rating: &RatingDto) {}
    async fn thread_transferred(&self, _summary: &ThreadSummary) {}
}
