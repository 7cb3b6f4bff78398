//! Post-resolution rating gate: one rating per closed thread, by its student

use learnhub_shared::{ThreadStatus, UserId};
use time::OffsetDateTime;

use super::error::{SupportError, SupportResult};
use super::ledger::trim_to_none;
use super::model::NewRating;
use super::store::LockedThread;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;
/// Width of `support_ratings.comment`
pub const MAX_COMMENT_CHARS: usize = 1000;

/// Decide whether `student_id` may rate the locked thread
///
/// Checked in order: ownership (reported as not found so non-owners learn
/// nothing), closure, range, comment length, then the existing-rating check. The store's
/// unique key on `thread_id` still backs the last check.
pub fn admit(
    locked: &LockedThread,
    student_id: UserId,
    rating: Option<i32>,
    comment: Option<&str>,
    now: OffsetDateTime,
) -> SupportResult<NewRating> {
    let thread = &locked.thread;
    if thread.student_id != student_id {
        return Err(SupportError::thread_not_found(thread.id));
    }
    if thread.status != ThreadStatus::Closed {
        return Err(SupportError::Conflict("Thread is not closed yet".to_string()));
    }

    let value = rating.unwrap_or(0);
    if !(MIN_RATING..=MAX_RATING).contains(&value) {
        return Err(SupportError::InvalidArgument(format!(
            "Rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }
    let comment = trim_to_none(comment);
    if comment
        .as_deref()
        .is_some_and(|c| c.chars().count() > MAX_COMMENT_CHARS)
    {
        return Err(SupportError::InvalidArgument(format!(
            "Comment is too long (max {MAX_COMMENT_CHARS} characters)"
        )));
    }
    if locked.rated {
        return Err(already_rated());
    }

    Ok(NewRating {
        student_id,
        rating: value as i16,
        comment,
        created_at: now,
    })
}

pub fn already_rated() -> SupportError {
    SupportError::Conflict("Thread has already been rated".to_string())
}
