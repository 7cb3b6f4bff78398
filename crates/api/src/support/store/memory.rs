//! In-memory store used by tests and local runs without Postgres

use async_trait::async_trait;
use learnhub_shared::{CourseId, ThreadId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{
    apply_mutation, Committed, Directory, LockedThread, Mutation, SupportStore, ThreadMutation,
    ThreadWrite,
};
use crate::support::error::{SupportError, SupportResult};
use crate::support::ledger::sort_ledger;
use crate::support::model::{
    CourseRef, NewMessage, Page, PageRequest, Participant, SupportMessage, SupportRating,
    SupportThread, ThreadFilter,
};
use crate::support::rating::already_rated;

/// Everything stored for one thread, guarded by that thread's mutex
#[derive(Debug)]
struct ThreadSlot {
    thread: SupportThread,
    messages: Vec<SupportMessage>,
    rating: Option<SupportRating>,
}

/// Map-backed [`SupportStore`] and [`Directory`]
///
/// The outer map lock is held only to find or insert a slot, so operations
/// on different threads never wait on each other.
#[derive(Default)]
pub struct MemoryStore {
    threads: RwLock<HashMap<ThreadId, Arc<Mutex<ThreadSlot>>>>,
    users: RwLock<HashMap<UserId, Participant>>,
    courses: RwLock<HashMap<CourseId, CourseRef>>,
    thread_seq: AtomicI64,
    message_seq: AtomicI64,
    rating_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, participant: Participant) {
        self.users.write().await.insert(participant.id, participant);
    }

    pub async fn insert_course(&self, course: CourseRef) {
        self.courses.write().await.insert(course.id, course);
    }

    async fn slot(&self, thread_id: ThreadId) -> Option<Arc<Mutex<ThreadSlot>>> {
        self.threads.read().await.get(&thread_id).cloned()
    }

    async fn snapshot(&self) -> Vec<SupportThread> {
        let slots: Vec<_> = self.threads.read().await.values().cloned().collect();
        let mut threads = Vec::with_capacity(slots.len());
        for slot in slots {
            threads.push(slot.lock().await.thread.clone());
        }
        threads
    }

    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn paginate(mut threads: Vec<SupportThread>, page: PageRequest) -> Page<SupportThread> {
        // Newest first; id breaks ties between equal timestamps
        threads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = threads.len() as i64;
        let items = threads
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Page { items, total }
    }

    async fn matches_keyword(&self, thread: &SupportThread, keyword: &str) -> bool {
        let users = self.users.read().await;
        users.get(&thread.student_id).is_some_and(|student| {
            [&student.full_name, &student.email]
                .into_iter()
                .flatten()
                .any(|value| value.to_lowercase().contains(keyword))
        })
    }
}

#[async_trait]
impl SupportStore for MemoryStore {
    async fn create_thread(
        &self,
        mut draft: SupportThread,
        first: NewMessage,
    ) -> SupportResult<(SupportThread, SupportMessage)> {
        draft.id = Self::next_id(&self.thread_seq);
        let message = SupportMessage::from_new(Self::next_id(&self.message_seq), draft.id, first);

        let slot = ThreadSlot {
            thread: draft.clone(),
            messages: vec![message.clone()],
            rating: None,
        };
        self.threads
            .write()
            .await
            .insert(draft.id, Arc::new(Mutex::new(slot)));

        Ok((draft, message))
    }

    async fn find_thread(&self, thread_id: ThreadId) -> SupportResult<Option<SupportThread>> {
        match self.slot(thread_id).await {
            Some(slot) => Ok(Some(slot.lock().await.thread.clone())),
            None => Ok(None),
        }
    }

    async fn list_messages(&self, thread_id: ThreadId) -> SupportResult<Vec<SupportMessage>> {
        let Some(slot) = self.slot(thread_id).await else {
            return Ok(Vec::new());
        };
        let mut messages = slot.lock().await.messages.clone();
        sort_ledger(&mut messages);
        Ok(messages)
    }

    async fn find_rating(&self, thread_id: ThreadId) -> SupportResult<Option<SupportRating>> {
        match self.slot(thread_id).await {
            Some(slot) => Ok(slot.lock().await.rating.clone()),
            None => Ok(None),
        }
    }

    async fn student_threads(
        &self,
        student_id: UserId,
        page: PageRequest,
    ) -> SupportResult<Page<SupportThread>> {
        let threads = self
            .snapshot()
            .await
            .into_iter()
            .filter(|t| t.student_id == student_id)
            .collect();
        Ok(Self::paginate(threads, page))
    }

    async fn search_threads(
        &self,
        filter: &ThreadFilter,
        manager_id: UserId,
        page: PageRequest,
    ) -> SupportResult<Page<SupportThread>> {
        let mut matched = Vec::new();
        for thread in self.snapshot().await {
            if filter.status.is_some_and(|s| s != thread.status)
                || filter.course_id.is_some_and(|c| thread.course_id != Some(c))
                || (filter.mine_only && thread.manager_id != Some(manager_id))
                || filter.from.is_some_and(|from| thread.created_at < from)
                || filter.to.is_some_and(|to| thread.created_at > to)
            {
                continue;
            }
            if let Some(keyword) = &filter.student_keyword {
                if !self.matches_keyword(&thread, keyword).await {
                    continue;
                }
            }
            matched.push(thread);
        }
        Ok(Self::paginate(matched, page))
    }

    async fn mutate_thread(
        &self,
        thread_id: ThreadId,
        mutation: ThreadMutation,
    ) -> SupportResult<Mutation> {
        let slot = self
            .slot(thread_id)
            .await
            .ok_or_else(|| SupportError::thread_not_found(thread_id))?;
        let mut slot = slot.lock().await;

        let mut locked = LockedThread {
            thread: slot.thread.clone(),
            rated: slot.rating.is_some(),
        };
        let (before, write) = apply_mutation(&mut locked, mutation)?;

        let committed = match write {
            ThreadWrite::Unchanged => {
                return Ok(Mutation {
                    after: before.clone(),
                    before,
                    committed: Committed::Nothing,
                })
            }
            ThreadWrite::Thread => Committed::Thread,
            ThreadWrite::Message(new) => {
                let message =
                    SupportMessage::from_new(Self::next_id(&self.message_seq), thread_id, new);
                slot.messages.push(message.clone());
                Committed::Message(message)
            }
            ThreadWrite::Rating(new) => {
                if slot.rating.is_some() {
                    return Err(already_rated());
                }
                let rating =
                    SupportRating::from_new(Self::next_id(&self.rating_seq), thread_id, new);
                slot.rating = Some(rating.clone());
                Committed::Rating(rating)
            }
        };

        slot.thread = locked.thread.clone();
        Ok(Mutation {
            before,
            after: locked.thread,
            committed,
        })
    }

    async fn ping(&self) -> SupportResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn find_participants(
        &self,
        ids: &[UserId],
    ) -> SupportResult<HashMap<UserId, Participant>> {
        let users = self.users.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| users.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn find_courses(&self, ids: &[CourseId]) -> SupportResult<HashMap<CourseId, CourseRef>> {
        let courses = self.courses.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| courses.get(id).map(|c| (*id, c.clone())))
            .collect())
    }
}
