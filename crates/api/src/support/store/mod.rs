//! Persistence gateway for support chat
//!
//! Every mutation of a thread goes through [`SupportStore::mutate_thread`]:
//! the store locks the thread, hands a snapshot to the caller's closure and
//! commits whatever the closure returns as one unit. Postgres locks the row
//! with `SELECT ... FOR UPDATE`; the in-memory store holds a per-thread mutex.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSupportStore;

use async_trait::async_trait;
use learnhub_shared::{CourseId, ThreadId, UserId};
use std::collections::HashMap;

use super::error::SupportResult;
use super::model::{
    CourseRef, NewMessage, NewRating, Page, PageRequest, Participant, SupportMessage,
    SupportRating, SupportThread, ThreadFilter,
};

/// Thread state as seen while its lock is held
#[derive(Debug, Clone)]
pub struct LockedThread {
    pub thread: SupportThread,
    /// A rating row already exists for this thread
    pub rated: bool,
}

/// What a mutation wants committed besides the (possibly edited) thread row
#[derive(Debug)]
pub enum ThreadWrite {
    /// Nothing changed; the transaction is rolled back
    Unchanged,
    /// Only thread columns changed
    Thread,
    /// Append a message and save the thread
    Message(NewMessage),
    /// Insert the thread's rating
    Rating(NewRating),
}

/// Rows created by a committed mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Committed {
    Nothing,
    Thread,
    Message(SupportMessage),
    Rating(SupportRating),
}

#[derive(Debug, Clone)]
pub struct Mutation {
    pub before: SupportThread,
    pub after: SupportThread,
    pub committed: Committed,
}

impl Mutation {
    pub fn changed(&self) -> bool {
        !matches!(self.committed, Committed::Nothing)
    }
}

/// Read-modify-write step run under the thread lock
pub type ThreadMutation = Box<dyn FnOnce(&mut LockedThread) -> SupportResult<ThreadWrite> + Send>;

#[async_trait]
pub trait SupportStore: Send + Sync {
    /// Persist a new thread together with its first message
    async fn create_thread(
        &self,
        draft: SupportThread,
        first: NewMessage,
    ) -> SupportResult<(SupportThread, SupportMessage)>;

    async fn find_thread(&self, thread_id: ThreadId) -> SupportResult<Option<SupportThread>>;

    /// Messages of a thread in ledger (id) order
    async fn list_messages(&self, thread_id: ThreadId) -> SupportResult<Vec<SupportMessage>>;

    async fn find_rating(&self, thread_id: ThreadId) -> SupportResult<Option<SupportRating>>;

    /// A student's threads, newest first
    async fn student_threads(
        &self,
        student_id: UserId,
        page: PageRequest,
    ) -> SupportResult<Page<SupportThread>>;

    /// Manager listing, newest first. `manager_id` is used by `mine_only`.
    async fn search_threads(
        &self,
        filter: &ThreadFilter,
        manager_id: UserId,
        page: PageRequest,
    ) -> SupportResult<Page<SupportThread>>;

    /// Lock the thread, run `mutation` and commit its result atomically
    ///
    /// An error from `mutation` aborts with nothing written.
    async fn mutate_thread(
        &self,
        thread_id: ThreadId,
        mutation: ThreadMutation,
    ) -> SupportResult<Mutation>;

    /// Cheap connectivity probe
    async fn ping(&self) -> SupportResult<()>;
}

/// Read-only lookup of platform users and courses
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_participants(
        &self,
        ids: &[UserId],
    ) -> SupportResult<HashMap<UserId, Participant>>;

    async fn find_courses(&self, ids: &[CourseId]) -> SupportResult<HashMap<CourseId, CourseRef>>;
}

/// Box a closure as a [`ThreadMutation`]
pub fn mutation<F>(f: F) -> ThreadMutation
where
    F: FnOnce(&mut LockedThread) -> SupportResult<ThreadWrite> + Send + 'static,
{
    Box::new(f)
}

/// Run `mutation` against `locked` and compute the thread row to save
///
/// Shared by both stores so they agree on what `Unchanged` means.
pub(crate) fn apply_mutation(
    locked: &mut LockedThread,
    mutation: ThreadMutation,
) -> SupportResult<(SupportThread, ThreadWrite)> {
    let before = locked.thread.clone();
    let write = mutation(locked)?;
    Ok((before, write))
}
