//! Core types for LearnHub support chat

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseEnumError;

/// Identifier types. All ids are database-assigned `BIGSERIAL` values.
pub type UserId = i64;
pub type CourseId = i64;
pub type ThreadId = i64;
pub type MessageId = i64;
pub type RatingId = i64;

// =============================================================================
// Thread status
// =============================================================================

/// Lifecycle status of a support thread
///
/// Stored lowercase (`in_progress`), serialized to clients upper case
/// (`IN_PROGRESS`). Parsing accepts either, case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadStatus {
    New,
    InProgress,
    WaitingStudent,
    Closed,
}

impl ThreadStatus {
    pub const ALL: [ThreadStatus; 4] = [
        ThreadStatus::New,
        ThreadStatus::InProgress,
        ThreadStatus::WaitingStudent,
        ThreadStatus::Closed,
    ];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::New => "new",
            ThreadStatus::InProgress => "in_progress",
            ThreadStatus::WaitingStudent => "waiting_student",
            ThreadStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ThreadStatus::Closed)
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    ///
    /// Staying in the same status is always allowed (it is a no-op).
    /// `Closed` has no outgoing edges and nothing leads back to `New`.
    pub fn can_transition_to(&self, next: ThreadStatus) -> bool {
        use ThreadStatus::*;

        match (*self, next) {
            (current, next) if current == next => true,
            (Closed, _) => false,
            (_, Closed) => true,
            (_, New) => false,
            (New, InProgress | WaitingStudent) => true,
            (InProgress, WaitingStudent) | (WaitingStudent, InProgress) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ThreadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("thread status", s))
    }
}

// =============================================================================
// Sender type
// =============================================================================

/// Who authored a support message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    Student,
    Manager,
    System,
    Bot,
}

impl SenderType {
    pub const ALL: [SenderType; 4] = [
        SenderType::Student,
        SenderType::Manager,
        SenderType::System,
        SenderType::Bot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Student => "student",
            SenderType::Manager => "manager",
            SenderType::System => "system",
            SenderType::Bot => "bot",
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenderType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        SenderType::ALL
            .into_iter()
            .find(|sender| sender.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("sender type", s))
    }
}

// =============================================================================
// Platform roles
// =============================================================================

/// Platform role carried in access tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Student,
    Manager,
    Teacher,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Manager => "manager",
            UserRole::Teacher => "teacher",
            UserRole::Admin => "admin",
        }
    }

    /// Roles that work the support queue
    pub fn is_support_staff(&self) -> bool {
        matches!(self, UserRole::Manager | UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Authority names ("ROLE_MANAGER") are accepted as well
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = normalized.strip_prefix("role_").unwrap_or(&normalized);
        match normalized {
            "student" => Ok(UserRole::Student),
            "manager" => Ok(UserRole::Manager),
            "teacher" => Ok(UserRole::Teacher),
            "admin" => Ok(UserRole::Admin),
            _ => Err(ParseEnumError::new("user role", s)),
        }
    }
}
