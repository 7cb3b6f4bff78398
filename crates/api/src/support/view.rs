//! Record to DTO conversion

use learnhub_shared::{CourseId, UserId};
use std::collections::HashMap;

use super::model::{
    CourseRef, MessageDto, Participant, RatingDto, SupportMessage, SupportRating, SupportThread,
    ThreadDetail, ThreadSummary,
};

/// Directory data needed to render a batch of threads and messages
#[derive(Debug, Default, Clone)]
pub struct Lookup {
    pub participants: HashMap<UserId, Participant>,
    pub courses: HashMap<CourseId, CourseRef>,
}

impl Lookup {
    fn participant(&self, id: UserId) -> Participant {
        self.participants
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Participant::unresolved(id))
    }
}

/// Ids a [`Lookup`] must cover for the given threads and messages
pub fn referenced_ids<'a>(
    threads: impl IntoIterator<Item = &'a SupportThread>,
    messages: impl IntoIterator<Item = &'a SupportMessage>,
) -> (Vec<UserId>, Vec<CourseId>) {
    let mut users = Vec::new();
    let mut courses = Vec::new();
    for thread in threads {
        users.push(thread.student_id);
        users.extend(thread.manager_id);
        courses.extend(thread.course_id);
    }
    users.extend(messages.into_iter().filter_map(|m| m.sender_id));

    users.sort_unstable();
    users.dedup();
    courses.sort_unstable();
    courses.dedup();
    (users, courses)
}

pub fn summary(thread: &SupportThread, lookup: &Lookup) -> ThreadSummary {
    ThreadSummary {
        id: thread.id,
        topic: thread.topic.clone(),
        subject: thread.subject.clone(),
        origin: thread.origin.clone(),
        channel: thread.channel.clone(),
        metadata: thread.metadata.clone(),
        course_id: thread.course_id,
        course_title: thread
            .course_id
            .and_then(|id| lookup.courses.get(&id))
            .map(|c| c.title.clone()),
        status: thread.status,
        priority: thread.priority.clone(),
        last_message_preview: thread.last_message_preview.clone(),
        last_message_at: thread.last_message_at,
        last_sender: thread.last_sender,
        unread_for_student: thread.has_unread_for_student,
        unread_for_manager: thread.has_unread_for_manager,
        created_at: thread.created_at,
        updated_at: thread.updated_at,
        closed_at: thread.closed_at,
        student: lookup.participant(thread.student_id),
        manager: thread.manager_id.map(|id| lookup.participant(id)),
    }
}

pub fn message(message: &SupportMessage, lookup: &Lookup) -> MessageDto {
    MessageDto {
        id: message.id,
        thread_id: message.thread_id,
        sender_type: message.sender_type,
        sender: message.sender_id.map(|id| lookup.participant(id)),
        content: message.content.clone(),
        created_at: message.created_at,
        attachments: message.attachments.clone(),
    }
}

pub fn rating(rating: &SupportRating) -> RatingDto {
    RatingDto {
        id: rating.id,
        rating: rating.rating,
        comment: rating.comment.clone(),
        created_at: rating.created_at,
    }
}

pub fn detail(
    thread: &SupportThread,
    messages: &[SupportMessage],
    thread_rating: Option<&SupportRating>,
    lookup: &Lookup,
) -> ThreadDetail {
    ThreadDetail {
        summary: summary(thread, lookup),
        messages: messages.iter().map(|m| message(m, lookup)).collect(),
        rating: thread_rating.map(rating),
    }
}
