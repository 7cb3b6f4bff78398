//! Support chat records, request bodies and response DTOs

use learnhub_shared::{
    CourseId, MessageId, RatingId, SenderType, ThreadId, ThreadStatus, UserId,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Largest page a listing returns
pub const MAX_PAGE_SIZE: i64 = 50;

// =============================================================================
// Stored records
// =============================================================================

/// One support conversation between a student and (eventually) a manager
#[derive(Debug, Clone, PartialEq)]
pub struct SupportThread {
    /// Assigned by the store; zero on a draft that has not been persisted
    pub id: ThreadId,
    pub student_id: UserId,
    pub manager_id: Option<UserId>,
    pub course_id: Option<CourseId>,
    pub topic: String,
    pub subject: Option<String>,
    pub origin: Option<String>,
    pub channel: Option<String>,
    pub priority: Option<String>,
    pub metadata: Option<String>,
    pub status: ThreadStatus,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<OffsetDateTime>,
    pub last_sender: Option<SenderType>,
    pub last_student_activity_at: Option<OffsetDateTime>,
    pub last_manager_activity_at: Option<OffsetDateTime>,
    pub has_unread_for_student: bool,
    pub has_unread_for_manager: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub closed_at: Option<OffsetDateTime>,
}

impl SupportThread {
    pub fn is_managed_by(&self, manager_id: UserId) -> bool {
        self.manager_id == Some(manager_id)
    }
}

/// A message that has passed validation but has no id yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: Option<UserId>,
    pub sender_type: SenderType,
    pub content: String,
    pub attachments: Vec<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupportMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: Option<UserId>,
    pub sender_type: SenderType,
    pub content: String,
    pub attachments: Vec<String>,
    pub created_at: OffsetDateTime,
}

impl SupportMessage {
    pub fn from_new(id: MessageId, thread_id: ThreadId, message: NewMessage) -> Self {
        Self {
            id,
            thread_id,
            sender_id: message.sender_id,
            sender_type: message.sender_type,
            content: message.content,
            attachments: message.attachments,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRating {
    pub student_id: UserId,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupportRating {
    pub id: RatingId,
    pub thread_id: ThreadId,
    pub student_id: UserId,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: OffsetDateTime,
}

impl SupportRating {
    pub fn from_new(id: RatingId, thread_id: ThreadId, rating: NewRating) -> Self {
        Self {
            id,
            thread_id,
            student_id: rating.student_id,
            rating: rating.rating,
            comment: rating.comment,
            created_at: rating.created_at,
        }
    }
}

// =============================================================================
// Directory projections
// =============================================================================

/// Read-only view of a platform user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: UserId,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl Participant {
    /// Placeholder used when the directory could not be consulted
    pub fn unresolved(id: UserId) -> Self {
        Self {
            id,
            full_name: None,
            email: None,
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseRef {
    pub id: CourseId,
    pub title: String,
}

// =============================================================================
// Queries
// =============================================================================

/// Who is acting on a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Student(UserId),
    Manager(UserId),
}

/// Zero-based page request, clamped on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    pub fn new(page: i64, size: i64) -> Self {
        Self {
            page: page.max(0),
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Parsed manager listing filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadFilter {
    pub status: Option<ThreadStatus>,
    pub course_id: Option<CourseId>,
    /// Lowercased, trimmed substring of the student's name or email
    pub student_keyword: Option<String>,
    pub mine_only: bool,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

/// Manager listing filter as supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ThreadFilterRequest {
    pub status: Option<String>,
    pub course_id: Option<CourseId>,
    pub student_keyword: Option<String>,
    pub mine_only: Option<bool>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateThreadRequest {
    pub topic: String,
    pub message: String,
    pub course_id: Option<CourseId>,
    pub subject: Option<String>,
    pub origin: Option<String>,
    pub channel: Option<String>,
    pub priority: Option<String>,
    pub metadata: Option<String>,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SendMessageRequest {
    pub content: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransferRequest {
    pub new_manager_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RatingRequest {
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

// =============================================================================
// Response DTOs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub topic: String,
    pub subject: Option<String>,
    pub origin: Option<String>,
    pub channel: Option<String>,
    pub metadata: Option<String>,
    pub course_id: Option<CourseId>,
    pub course_title: Option<String>,
    pub status: ThreadStatus,
    pub priority: Option<String>,
    pub last_message_preview: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    pub last_sender: Option<SenderType>,
    pub unread_for_student: bool,
    pub unread_for_manager: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub student: Participant,
    pub manager: Option<Participant>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadDetail {
    #[serde(flatten)]
    pub summary: ThreadSummary,
    pub messages: Vec<MessageDto>,
    pub rating: Option<RatingDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageDto {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_type: SenderType,
    pub sender: Option<Participant>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingDto {
    pub id: RatingId,
    pub rating: i16,
    pub comment: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadListResponse {
    pub data: Vec<ThreadSummary>,
    pub total_elements: i64,
    pub page: i64,
    pub size: i64,
}
