//! Thread state machine
//!
//! Pure functions over [`SupportThread`]. Callers run them while holding the
//! thread lock; nothing here touches storage.
//!
//! Lifecycle: `NEW -> IN_PROGRESS <-> WAITING_STUDENT`, any open status
//! `-> CLOSED`, and `CLOSED` is terminal.

use learnhub_shared::{CourseId, SenderType, ThreadStatus, UserId};
use time::OffsetDateTime;

use super::error::{SupportError, SupportResult};
use super::ledger::truncate_chars;
use super::model::{NewMessage, SupportThread};

pub const PREVIEW_MAX_CHARS: usize = 480;

/// Validated fields of a thread that is about to be opened
#[derive(Debug, Clone, Default)]
pub struct ThreadDraft {
    pub student_id: UserId,
    pub course_id: Option<CourseId>,
    pub topic: String,
    pub subject: Option<String>,
    pub origin: Option<String>,
    pub channel: Option<String>,
    pub priority: Option<String>,
    pub metadata: Option<String>,
}

/// Which side of the conversation is reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Student,
    Manager,
}

pub fn open(draft: ThreadDraft, now: OffsetDateTime) -> SupportThread {
    SupportThread {
        id: 0,
        student_id: draft.student_id,
        manager_id: None,
        course_id: draft.course_id,
        topic: draft.topic,
        subject: draft.subject,
        origin: draft.origin,
        channel: draft.channel,
        priority: draft.priority,
        metadata: draft.metadata,
        status: ThreadStatus::New,
        last_message_preview: None,
        last_message_at: None,
        last_sender: None,
        last_student_activity_at: Some(now),
        last_manager_activity_at: None,
        has_unread_for_student: false,
        has_unread_for_manager: true,
        created_at: now,
        updated_at: now,
        closed_at: None,
    }
}

pub fn preview(content: &str) -> String {
    truncate_chars(content, PREVIEW_MAX_CHARS)
}

pub fn ensure_open(thread: &SupportThread) -> SupportResult<()> {
    if thread.status.is_terminal() {
        return Err(SupportError::thread_closed());
    }
    Ok(())
}

/// Apply an appended message to the thread's summary, flags and status
///
/// The sender's own unread flag is cleared and the other side's is raised.
/// System and bot messages only refresh the summary.
pub fn record_message(thread: &mut SupportThread, message: &NewMessage) {
    let at = message.created_at;

    thread.last_message_preview = Some(preview(&message.content));
    thread.last_message_at = Some(at);
    thread.last_sender = Some(message.sender_type);
    thread.updated_at = at;

    match message.sender_type {
        SenderType::Student => {
            thread.last_student_activity_at = Some(at);
            thread.has_unread_for_manager = true;
            thread.has_unread_for_student = false;
            if thread.status == ThreadStatus::WaitingStudent {
                thread.status = ThreadStatus::InProgress;
            }
        }
        SenderType::Manager => {
            thread.last_manager_activity_at = Some(at);
            thread.has_unread_for_student = true;
            thread.has_unread_for_manager = false;
            if thread.manager_id.is_none() {
                thread.manager_id = message.sender_id;
            }
            if matches!(
                thread.status,
                ThreadStatus::New | ThreadStatus::WaitingStudent
            ) {
                thread.status = ThreadStatus::InProgress;
            }
        }
        SenderType::System | SenderType::Bot => {}
    }
}

/// Move the thread to `next`. Returns whether anything changed.
///
/// Requesting the current status is a no-op, which makes re-closing a closed
/// thread succeed with `closed_at` untouched.
pub fn change_status(
    thread: &mut SupportThread,
    next: ThreadStatus,
    now: OffsetDateTime,
) -> SupportResult<bool> {
    if thread.status == next {
        return Ok(false);
    }
    if !thread.status.can_transition_to(next) {
        return Err(SupportError::Conflict(format!(
            "Cannot move thread from {} to {}",
            thread.status, next
        )));
    }

    thread.status = next;
    thread.updated_at = now;
    if next == ThreadStatus::Closed {
        thread.closed_at = Some(now);
    }
    Ok(true)
}

/// Assign `manager_id` (if unassigned) and put the thread in progress
pub fn claim(
    thread: &mut SupportThread,
    manager_id: UserId,
    now: OffsetDateTime,
) -> SupportResult<bool> {
    match thread.manager_id {
        Some(current) if current != manager_id => {
            return Err(SupportError::Conflict(
                "Thread is already handled by another manager".to_string(),
            ))
        }
        _ => {}
    }
    ensure_open(thread)?;

    let assigned = thread.manager_id.is_none();
    thread.manager_id = Some(manager_id);
    let moved = change_status(thread, ThreadStatus::InProgress, now)?;
    if assigned && !moved {
        thread.updated_at = now;
    }
    Ok(assigned || moved)
}

/// Hand the thread from its current manager to `to`
pub fn transfer(
    thread: &mut SupportThread,
    from: UserId,
    to: UserId,
    now: OffsetDateTime,
) -> SupportResult<bool> {
    if !thread.is_managed_by(from) {
        return Err(SupportError::not_assigned_manager());
    }
    ensure_open(thread)?;
    if from == to {
        return Ok(false);
    }

    thread.manager_id = Some(to);
    thread.status = ThreadStatus::InProgress;
    thread.updated_at = now;
    Ok(true)
}

/// Clear the reader's unread flag. Not a transition: `updated_at` is kept.
pub fn mark_read(thread: &mut SupportThread, party: Party) -> bool {
    let flag = match party {
        Party::Student => &mut thread.has_unread_for_student,
        Party::Manager => &mut thread.has_unread_for_manager,
    };
    std::mem::replace(flag, false)
}

/// Whether fields shown in thread lists changed beyond the message itself
pub fn summary_changed(before: &SupportThread, after: &SupportThread) -> bool {
    before.status != after.status
        || before.manager_id != after.manager_id
        || before.has_unread_for_student != after.has_unread_for_student
        || before.has_unread_for_manager != after.has_unread_for_manager
}
