//! Support chat orchestrator
//!
//! Each operation validates its input, runs one locked read-modify-write
//! through the store under the service deadline, and only after the commit
//! renders DTOs and publishes realtime events. Event publication never
//! affects the operation's result.

use learnhub_shared::{CourseId, SenderType, ThreadId, ThreadStatus, UserId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use super::error::{SupportError, SupportResult};
use super::ledger::{self, trim_to_none};
use super::model::{
    Actor, CreateThreadRequest, MessageDto, Page, PageRequest, Participant, RatingDto,
    RatingRequest, SendMessageRequest, SupportMessage, SupportThread, ThreadDetail, ThreadFilter,
    ThreadFilterRequest, ThreadListResponse, ThreadSummary, TransferRequest, UpdateStatusRequest,
};
use super::rating;
use super::realtime::RealtimeGateway;
use super::store::{mutation, Committed, Directory, Mutation, SupportStore, ThreadWrite};
use super::thread::{self, Party, ThreadDraft};
use super::view::{self, Lookup};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

// Column widths of support_threads
const MAX_TOPIC_CHARS: usize = 64;
const MAX_SUBJECT_CHARS: usize = 255;
const MAX_ORIGIN_CHARS: usize = 64;
const MAX_CHANNEL_CHARS: usize = 32;
const MAX_PRIORITY_CHARS: usize = 16;

#[derive(Clone)]
pub struct SupportService {
    store: Arc<dyn SupportStore>,
    directory: Arc<dyn Directory>,
    realtime: Arc<dyn RealtimeGateway>,
    deadline: Duration,
}

impl SupportService {
    pub fn new(
        store: Arc<dyn SupportStore>,
        directory: Arc<dyn Directory>,
        realtime: Arc<dyn RealtimeGateway>,
    ) -> Self {
        Self {
            store,
            directory,
            realtime,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Same service with a different per-operation deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    // =========================================================================
    // Student operations
    // =========================================================================

    pub async fn create_thread(
        &self,
        student_id: UserId,
        req: CreateThreadRequest,
    ) -> SupportResult<ThreadDetail> {
        let now = OffsetDateTime::now_utc();

        let (thread, first, lookup) = self
            .within("create_thread", async {
                let student = self.require_participant(student_id).await?;

                let topic = trim_to_none(Some(req.topic.as_str()))
                    .ok_or_else(|| SupportError::InvalidArgument("Topic is required".to_string()))?;
                let first = ledger::compose(
                    Some(student_id),
                    SenderType::Student,
                    &req.message,
                    &req.attachments,
                    now,
                )?;
                let draft = ThreadDraft {
                    student_id,
                    course_id: req.course_id,
                    topic: bounded("topic", Some(topic), MAX_TOPIC_CHARS)?.unwrap_or_default(),
                    subject: bounded("subject", trim_to_none(req.subject.as_deref()), MAX_SUBJECT_CHARS)?,
                    origin: bounded("origin", trim_to_none(req.origin.as_deref()), MAX_ORIGIN_CHARS)?,
                    channel: bounded("channel", trim_to_none(req.channel.as_deref()), MAX_CHANNEL_CHARS)?,
                    priority: bounded("priority", trim_to_none(req.priority.as_deref()), MAX_PRIORITY_CHARS)?,
                    metadata: trim_to_none(req.metadata.as_deref()),
                };

                let mut lookup = Lookup::default();
                lookup.participants.insert(student_id, student);
                if let Some(course_id) = req.course_id {
                    let course = self
                        .directory
                        .find_courses(&[course_id])
                        .await?
                        .remove(&course_id)
                        .ok_or_else(|| SupportError::course_not_found(course_id))?;
                    lookup.courses.insert(course_id, course);
                }

                let mut opened = thread::open(draft, now);
                thread::record_message(&mut opened, &first);
                let (thread, first) = self.store.create_thread(opened, first).await?;
                Ok((thread, first, lookup))
            })
            .await?;

        tracing::info!(
            thread_id = thread.id,
            student_id,
            topic = %thread.topic,
            "Support thread opened"
        );

        let detail = view::detail(&thread, std::slice::from_ref(&first), None, &lookup);
        let message = view::message(&first, &lookup);
        self.realtime.thread_created(&detail).await;
        self.realtime.message_appended(thread.id, &message).await;

        Ok(detail)
    }

    pub async fn student_threads(
        &self,
        student_id: UserId,
        page: i64,
        size: i64,
    ) -> SupportResult<ThreadListResponse> {
        let request = PageRequest::new(page, size);
        let found = self
            .within("student_threads", self.store.student_threads(student_id, request))
            .await?;
        Ok(self.list_response(found, request).await)
    }

    /// Owner-only detail; clears the student's unread flag
    pub async fn student_thread_detail(
        &self,
        thread_id: ThreadId,
        student_id: UserId,
    ) -> SupportResult<ThreadDetail> {
        let read = mutation(move |locked| {
            if locked.thread.student_id != student_id {
                return Err(SupportError::thread_not_found(thread_id));
            }
            Ok(mark_read(&mut locked.thread, Party::Student))
        });
        self.read_detail("student_thread_detail", thread_id, read).await
    }

    pub async fn student_send_message(
        &self,
        thread_id: ThreadId,
        student_id: UserId,
        req: SendMessageRequest,
    ) -> SupportResult<MessageDto> {
        let append = mutation(move |locked| {
            let thread = &mut locked.thread;
            if thread.student_id != student_id {
                return Err(SupportError::Forbidden(
                    "Only the thread's student can post as student".to_string(),
                ));
            }
            thread::ensure_open(thread)?;
            // Stamped under the lock so created_at follows ledger order
            let message = ledger::compose(
                Some(student_id),
                SenderType::Student,
                &req.content,
                &req.attachments,
                OffsetDateTime::now_utc(),
            )?;
            thread::record_message(thread, &message);
            Ok(ThreadWrite::Message(message))
        });

        let outcome = self
            .within("student_send_message", self.store.mutate_thread(thread_id, append))
            .await?;
        self.publish_message(outcome).await
    }

    pub async fn submit_rating(
        &self,
        thread_id: ThreadId,
        student_id: UserId,
        req: RatingRequest,
    ) -> SupportResult<RatingDto> {
        let now = OffsetDateTime::now_utc();
        let rate = mutation(move |locked| {
            let rating = rating::admit(locked, student_id, req.rating, req.comment.as_deref(), now)?;
            Ok(ThreadWrite::Rating(rating))
        });

        let outcome = self
            .within("submit_rating", self.store.mutate_thread(thread_id, rate))
            .await?;
        let Committed::Rating(saved) = outcome.committed else {
            return Err(SupportError::Internal("rating was not stored".to_string()));
        };

        tracing::info!(thread_id, student_id, rating = saved.rating, "Support thread rated");

        let dto = view::rating(&saved);
        self.realtime.thread_rated(thread_id, &dto).await;
        Ok(dto)
    }

    // =========================================================================
    // Manager operations
    // =========================================================================

    pub async fn manager_threads(
        &self,
        manager_id: UserId,
        filter: ThreadFilterRequest,
        page: i64,
        size: i64,
    ) -> SupportResult<ThreadListResponse> {
        let status = trim_to_none(filter.status.as_deref())
            .map(|raw| parse_status(&raw))
            .transpose()?;
        let filter = ThreadFilter {
            status,
            course_id: filter.course_id,
            student_keyword: trim_to_none(filter.student_keyword.as_deref())
                .map(|k| k.to_lowercase()),
            mine_only: filter.mine_only.unwrap_or(false),
            from: filter.from,
            to: filter.to,
        };

        let request = PageRequest::new(page, size);
        let found = self
            .within(
                "manager_threads",
                self.store.search_threads(&filter, manager_id, request),
            )
            .await?;
        Ok(self.list_response(found, request).await)
    }

    /// Any manager may view; only the assigned one clears the unread flag
    pub async fn manager_thread_detail(
        &self,
        thread_id: ThreadId,
        manager_id: UserId,
    ) -> SupportResult<ThreadDetail> {
        let read = mutation(move |locked| {
            if !locked.thread.is_managed_by(manager_id) {
                return Ok(ThreadWrite::Unchanged);
            }
            Ok(mark_read(&mut locked.thread, Party::Manager))
        });
        self.read_detail("manager_thread_detail", thread_id, read).await
    }

    pub async fn claim_thread(
        &self,
        thread_id: ThreadId,
        manager_id: UserId,
    ) -> SupportResult<ThreadSummary> {
        let now = OffsetDateTime::now_utc();
        let claim = mutation(move |locked| {
            Ok(written(thread::claim(&mut locked.thread, manager_id, now)?))
        });

        let outcome = self
            .within("claim_thread", self.store.mutate_thread(thread_id, claim))
            .await?;
        if outcome.changed() {
            tracing::info!(thread_id, manager_id, "Support thread claimed");
        }
        self.publish_summary(outcome, false).await
    }

    pub async fn manager_send_message(
        &self,
        thread_id: ThreadId,
        manager_id: UserId,
        req: SendMessageRequest,
    ) -> SupportResult<MessageDto> {
        let append = mutation(move |locked| {
            let thread = &mut locked.thread;
            if thread.manager_id.is_some_and(|current| current != manager_id) {
                return Err(SupportError::not_assigned_manager());
            }
            thread::ensure_open(thread)?;
            let message = ledger::compose(
                Some(manager_id),
                SenderType::Manager,
                &req.content,
                &req.attachments,
                OffsetDateTime::now_utc(),
            )?;
            // Assigns the sender when the thread has no manager yet
            thread::record_message(thread, &message);
            Ok(ThreadWrite::Message(message))
        });

        let outcome = self
            .within("manager_send_message", self.store.mutate_thread(thread_id, append))
            .await?;
        self.publish_message(outcome).await
    }

    pub async fn update_status(
        &self,
        thread_id: ThreadId,
        manager_id: UserId,
        req: UpdateStatusRequest,
    ) -> SupportResult<ThreadSummary> {
        let next = parse_status(&req.status)?;
        let now = OffsetDateTime::now_utc();

        let change = mutation(move |locked| {
            if !locked.thread.is_managed_by(manager_id) {
                return Err(SupportError::not_assigned_manager());
            }
            Ok(written(thread::change_status(&mut locked.thread, next, now)?))
        });

        let outcome = self
            .within("update_status", self.store.mutate_thread(thread_id, change))
            .await?;
        if outcome.changed() {
            tracing::info!(
                thread_id,
                manager_id,
                from = %outcome.before.status,
                to = %next,
                note = ?trim_to_none(req.note.as_deref()),
                "Support thread status changed"
            );
        }
        self.publish_summary(outcome, false).await
    }

    pub async fn transfer_thread(
        &self,
        thread_id: ThreadId,
        manager_id: UserId,
        req: TransferRequest,
    ) -> SupportResult<ThreadSummary> {
        let target = req.new_manager_id.ok_or_else(|| {
            SupportError::InvalidArgument("new_manager_id is required".to_string())
        })?;
        let now = OffsetDateTime::now_utc();

        let outcome = self
            .within("transfer_thread", async {
                // Authorize before resolving the target; the mutation re-checks under the lock
                let current = self
                    .store
                    .find_thread(thread_id)
                    .await?
                    .ok_or_else(|| SupportError::thread_not_found(thread_id))?;
                if !current.is_managed_by(manager_id) {
                    return Err(SupportError::not_assigned_manager());
                }
                if target != manager_id {
                    self.require_participant(target).await?;
                }

                let handover = mutation(move |locked| {
                    Ok(written(thread::transfer(&mut locked.thread, manager_id, target, now)?))
                });
                self.store.mutate_thread(thread_id, handover).await
            })
            .await?;

        if outcome.changed() {
            tracing::info!(thread_id, from = manager_id, to = target, "Support thread transferred");
        }
        self.publish_summary(outcome, true).await
    }

    // =========================================================================
    // Realtime authorization
    // =========================================================================

    /// Whether `actor` may subscribe to a thread's topic
    pub async fn authorize_subscription(
        &self,
        thread_id: ThreadId,
        actor: Actor,
    ) -> SupportResult<()> {
        let thread = self
            .within("authorize_subscription", self.store.find_thread(thread_id))
            .await?
            .ok_or_else(|| SupportError::thread_not_found(thread_id))?;

        match actor {
            Actor::Manager(_) => Ok(()),
            Actor::Student(id) if id == thread.student_id => Ok(()),
            Actor::Student(_) => Err(SupportError::Forbidden(
                "Access denied to thread".to_string(),
            )),
        }
    }

    /// Storage connectivity probe for readiness checks
    pub async fn ping(&self) -> SupportResult<()> {
        self.within("ping", self.store.ping()).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn within<T, F>(&self, operation: &'static str, fut: F) -> SupportResult<T>
    where
        F: Future<Output = SupportResult<T>>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Support operation exceeded its deadline"
                );
                Err(SupportError::Timeout)
            }
        }
    }

    async fn require_participant(&self, user_id: UserId) -> SupportResult<Participant> {
        self.directory
            .find_participants(&[user_id])
            .await?
            .remove(&user_id)
            .ok_or_else(|| SupportError::user_not_found(user_id))
    }

    /// Best-effort directory lookup for rendering; misses render as bare ids
    async fn lookup(&self, users: &[UserId], courses: &[CourseId]) -> Lookup {
        let fetch = async {
            Ok::<_, SupportError>(Lookup {
                participants: self.directory.find_participants(users).await?,
                courses: self.directory.find_courses(courses).await?,
            })
        };

        match tokio::time::timeout(self.deadline, fetch).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Directory lookup failed, rendering bare participants");
                Lookup::default()
            }
            Err(_) => {
                tracing::warn!("Directory lookup timed out, rendering bare participants");
                Lookup::default()
            }
        }
    }

    async fn lookup_for(&self, threads: &[SupportThread], messages: &[SupportMessage]) -> Lookup {
        let (users, courses) = view::referenced_ids(threads, messages);
        self.lookup(&users, &courses).await
    }

    async fn list_response(
        &self,
        found: Page<SupportThread>,
        request: PageRequest,
    ) -> ThreadListResponse {
        let lookup = self.lookup_for(&found.items, &[]).await;
        ThreadListResponse {
            data: found.items.iter().map(|t| view::summary(t, &lookup)).collect(),
            total_elements: found.total,
            page: request.page,
            size: request.size,
        }
    }

    async fn read_detail(
        &self,
        operation: &'static str,
        thread_id: ThreadId,
        read: super::store::ThreadMutation,
    ) -> SupportResult<ThreadDetail> {
        let (thread, messages, rating) = self
            .within(operation, async {
                let outcome = self.store.mutate_thread(thread_id, read).await?;
                let messages = self.store.list_messages(thread_id).await?;
                let rating = self.store.find_rating(thread_id).await?;
                Ok((outcome.after, messages, rating))
            })
            .await?;

        let lookup = self
            .lookup_for(std::slice::from_ref(&thread), &messages)
            .await;
        Ok(view::detail(&thread, &messages, rating.as_ref(), &lookup))
    }

    /// Emit `message_appended`, then `thread_updated` if list fields changed
    async fn publish_message(&self, outcome: Mutation) -> SupportResult<MessageDto> {
        let Committed::Message(message) = &outcome.committed else {
            return Err(SupportError::Internal("message was not stored".to_string()));
        };

        let lookup = self
            .lookup_for(std::slice::from_ref(&outcome.after), std::slice::from_ref(message))
            .await;
        let dto = view::message(message, &lookup);

        tracing::debug!(
            thread_id = outcome.after.id,
            message_id = message.id,
            sender_type = %message.sender_type,
            "Support message appended"
        );

        self.realtime.message_appended(outcome.after.id, &dto).await;
        if thread::summary_changed(&outcome.before, &outcome.after) {
            let summary = view::summary(&outcome.after, &lookup);
            self.realtime.thread_updated(&summary).await;
        }
        Ok(dto)
    }

    /// Render the thread and, if it changed, emit `thread_updated`
    /// (and `thread_transferred` when `transferred`)
    async fn publish_summary(
        &self,
        outcome: Mutation,
        transferred: bool,
    ) -> SupportResult<ThreadSummary> {
        let lookup = self
            .lookup_for(std::slice::from_ref(&outcome.after), &[])
            .await;
        let summary = view::summary(&outcome.after, &lookup);

        if outcome.changed() {
            self.realtime.thread_updated(&summary).await;
            if transferred {
                self.realtime.thread_transferred(&summary).await;
            }
        }
        Ok(summary)
    }
}

fn parse_status(raw: &str) -> SupportResult<ThreadStatus> {
    raw.parse::<ThreadStatus>()
        .map_err(|_| SupportError::InvalidArgument(format!("Invalid thread status: {:?}", raw.trim())))
}

fn bounded(field: &str, value: Option<String>, max: usize) -> SupportResult<Option<String>> {
    match value {
        Some(v) if v.chars().count() > max => Err(SupportError::InvalidArgument(format!(
            "{field} is too long (max {max} characters)"
        ))),
        other => Ok(other),
    }
}

fn written(changed: bool) -> ThreadWrite {
    if changed {
        ThreadWrite::Thread
    } else {
        ThreadWrite::Unchanged
    }
}

fn mark_read(thread: &mut SupportThread, party: Party) -> ThreadWrite {
    written(thread::mark_read(thread, party))
}
