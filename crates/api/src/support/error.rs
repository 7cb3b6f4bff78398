//! Support chat error taxonomy

use thiserror::Error;

/// Errors raised by the support chat core
///
/// Validation and authorization variants are produced before any write is
/// attempted. Storage failures surface as `Unavailable`, `Timeout` or
/// `Internal`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupportError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Operation timed out")]
    Timeout,
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupportError {
    pub fn thread_not_found(thread_id: i64) -> Self {
        SupportError::NotFound(format!("Support thread #{thread_id} not found"))
    }

    pub fn user_not_found(user_id: i64) -> Self {
        SupportError::NotFound(format!("User #{user_id} not found"))
    }

    pub fn course_not_found(course_id: i64) -> Self {
        SupportError::NotFound(format!("Course #{course_id} not found"))
    }

    pub fn not_assigned_manager() -> Self {
        SupportError::Forbidden("Only the manager assigned to this thread can do that".to_string())
    }

    pub fn thread_closed() -> Self {
        SupportError::Conflict("Thread is closed".to_string())
    }
}

pub type SupportResult<T> = Result<T, SupportError>;
