//! Postgres-backed support store

use async_trait::async_trait;
use learnhub_shared::{CourseId, SenderType, ThreadId, ThreadStatus, UserId};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use time::OffsetDateTime;

use super::{
    apply_mutation, Committed, Directory, LockedThread, Mutation, SupportStore, ThreadMutation,
    ThreadWrite,
};
use crate::support::error::{SupportError, SupportResult};
use crate::support::model::{
    CourseRef, NewMessage, NewRating, Page, PageRequest, Participant, SupportMessage,
    SupportRating, SupportThread, ThreadFilter,
};
use crate::support::rating::already_rated;

const THREAD_COLUMNS: &str = r#"
    t.id, t.student_id, t.manager_id, t.course_id, t.topic, t.subject, t.origin,
    t.channel, t.priority, t.metadata, t.status, t.last_message_preview,
    t.last_message_at, t.last_sender, t.last_student_activity_at,
    t.last_manager_activity_at, t.has_unread_for_student, t.has_unread_for_manager,
    t.created_at, t.updated_at, t.closed_at
"#;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

impl From<sqlx::Error> for SupportError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => SupportError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    SupportError::Conflict("Resource already exists".to_string())
                }
                Some(FOREIGN_KEY_VIOLATION) => {
                    SupportError::NotFound("Referenced record does not exist".to_string())
                }
                _ => {
                    tracing::error!(error = %db_err, "Database error");
                    SupportError::Internal(db_err.to_string())
                }
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                tracing::warn!(error = %err, "Database unavailable");
                SupportError::Unavailable(err.to_string())
            }
            other => {
                tracing::error!(error = ?other, "Database error");
                SupportError::Internal(other.to_string())
            }
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, FromRow)]
struct ThreadRow {
    id: i64,
    student_id: i64,
    manager_id: Option<i64>,
    course_id: Option<i64>,
    topic: String,
    subject: Option<String>,
    origin: Option<String>,
    channel: Option<String>,
    priority: Option<String>,
    metadata: Option<String>,
    status: String,
    last_message_preview: Option<String>,
    last_message_at: Option<OffsetDateTime>,
    last_sender: Option<String>,
    last_student_activity_at: Option<OffsetDateTime>,
    last_manager_activity_at: Option<OffsetDateTime>,
    has_unread_for_student: bool,
    has_unread_for_manager: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    closed_at: Option<OffsetDateTime>,
}

impl TryFrom<ThreadRow> for SupportThread {
    type Error = SupportError;

    fn try_from(row: ThreadRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ThreadStatus>()
            .map_err(|e| SupportError::Internal(e.to_string()))?;
        let last_sender = row
            .last_sender
            .as_deref()
            .map(str::parse::<SenderType>)
            .transpose()
            .map_err(|e| SupportError::Internal(e.to_string()))?;

        Ok(SupportThread {
            id: row.id,
            student_id: row.student_id,
            manager_id: row.manager_id,
            course_id: row.course_id,
            topic: row.topic,
            subject: row.subject,
            origin: row.origin,
            channel: row.channel,
            priority: row.priority,
            metadata: row.metadata,
            status,
            last_message_preview: row.last_message_preview,
            last_message_at: row.last_message_at,
            last_sender,
            last_student_activity_at: row.last_student_activity_at,
            last_manager_activity_at: row.last_manager_activity_at,
            has_unread_for_student: row.has_unread_for_student,
            has_unread_for_manager: row.has_unread_for_manager,
            created_at: row.created_at,
            updated_at: row.updated_at,
            closed_at: row.closed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    thread_id: i64,
    sender_id: Option<i64>,
    sender_type: String,
    content: String,
    created_at: OffsetDateTime,
    attachments: Vec<String>,
}

impl TryFrom<MessageRow> for SupportMessage {
    type Error = SupportError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(SupportMessage {
            id: row.id,
            thread_id: row.thread_id,
            sender_id: row.sender_id,
            sender_type: row
                .sender_type
                .parse::<SenderType>()
                .map_err(|e| SupportError::Internal(e.to_string()))?,
            content: row.content,
            attachments: row.attachments,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RatingRow {
    id: i64,
    thread_id: i64,
    student_id: i64,
    rating: i16,
    comment: Option<String>,
    created_at: OffsetDateTime,
}

impl From<RatingRow> for SupportRating {
    fn from(row: RatingRow) -> Self {
        SupportRating {
            id: row.id,
            thread_id: row.thread_id,
            student_id: row.student_id,
            rating: row.rating,
            comment: row.comment,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    id: i64,
    full_name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, FromRow)]
struct CourseRow {
    id: i64,
    title: String,
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

// =============================================================================
// Store
// =============================================================================

/// [`SupportStore`] and [`Directory`] over the support schema
#[derive(Clone)]
pub struct PgSupportStore {
    pool: PgPool,
}

impl PgSupportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_message(
        tx: &mut Transaction<'_, Postgres>,
        thread_id: ThreadId,
        message: NewMessage,
    ) -> SupportResult<SupportMessage> {
        let message_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO support_messages (thread_id, sender_id, sender_type, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(thread_id)
        .bind(message.sender_id)
        .bind(message.sender_type.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .fetch_one(&mut **tx)
        .await?;

        if !message.attachments.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO support_message_attachments (message_id, attachment_url, position)
                SELECT $1, a.url, a.ord::int
                FROM UNNEST($2::text[]) WITH ORDINALITY AS a(url, ord)
                "#,
            )
            .bind(message_id)
            .bind(&message.attachments)
            .execute(&mut **tx)
            .await?;
        }

        Ok(SupportMessage::from_new(message_id, thread_id, message))
    }

    async fn insert_rating(
        tx: &mut Transaction<'_, Postgres>,
        thread_id: ThreadId,
        rating: NewRating,
    ) -> SupportResult<SupportRating> {
        let rating_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO support_ratings (thread_id, student_id, rating, comment, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(thread_id)
        .bind(rating.student_id)
        .bind(rating.rating)
        .bind(&rating.comment)
        .bind(rating.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                already_rated()
            } else {
                SupportError::from(e)
            }
        })?;

        Ok(SupportRating::from_new(rating_id, thread_id, rating))
    }

    async fn save_thread(
        tx: &mut Transaction<'_, Postgres>,
        thread: &SupportThread,
    ) -> SupportResult<()> {
        sqlx::query(
            r#"
            UPDATE support_threads SET
                manager_id = $2,
                status = $3,
                last_message_preview = $4,
                last_message_at = $5,
                last_sender = $6,
                last_student_activity_at = $7,
                last_manager_activity_at = $8,
                has_unread_for_student = $9,
                has_unread_for_manager = $10,
                updated_at = $11,
                closed_at = $12
            WHERE id = $1
            "#,
        )
        .bind(thread.id)
        .bind(thread.manager_id)
        .bind(thread.status.as_str())
        .bind(&thread.last_message_preview)
        .bind(thread.last_message_at)
        .bind(thread.last_sender.map(|s| s.as_str()))
        .bind(thread.last_student_activity_at)
        .bind(thread.last_manager_activity_at)
        .bind(thread.has_unread_for_student)
        .bind(thread.has_unread_for_manager)
        .bind(thread.updated_at)
        .bind(thread.closed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    fn page_of(rows: Vec<ThreadRow>, total: i64) -> SupportResult<Page<SupportThread>> {
        let items = rows
            .into_iter()
            .map(SupportThread::try_from)
            .collect::<SupportResult<Vec<_>>>()?;
        Ok(Page { items, total })
    }
}

#[async_trait]
impl SupportStore for PgSupportStore {
    async fn create_thread(
        &self,
        draft: SupportThread,
        first: NewMessage,
    ) -> SupportResult<(SupportThread, SupportMessage)> {
        let mut tx = self.pool.begin().await?;

        let thread_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO support_threads (
                student_id, manager_id, course_id, topic, subject, origin, status,
                priority, channel, metadata, last_message_preview, last_message_at,
                last_sender, last_student_activity_at, last_manager_activity_at,
                has_unread_for_student, has_unread_for_manager, created_at, updated_at,
                closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20)
            RETURNING id
            "#,
        )
        .bind(draft.student_id)
        .bind(draft.manager_id)
        .bind(draft.course_id)
        .bind(&draft.topic)
        .bind(&draft.subject)
        .bind(&draft.origin)
        .bind(draft.status.as_str())
        .bind(&draft.priority)
        .bind(&draft.channel)
        .bind(&draft.metadata)
        .bind(&draft.last_message_preview)
        .bind(draft.last_message_at)
        .bind(draft.last_sender.map(|s| s.as_str()))
        .bind(draft.last_student_activity_at)
        .bind(draft.last_manager_activity_at)
        .bind(draft.has_unread_for_student)
        .bind(draft.has_unread_for_manager)
        .bind(draft.created_at)
        .bind(draft.updated_at)
        .bind(draft.closed_at)
        .fetch_one(&mut *tx)
        .await?;

        let message = Self::insert_message(&mut tx, thread_id, first).await?;
        tx.commit().await?;

        tracing::info!(thread_id, student_id = draft.student_id, "Support thread created");
        Ok((SupportThread { id: thread_id, ..draft }, message))
    }

    async fn find_thread(&self, thread_id: ThreadId) -> SupportResult<Option<SupportThread>> {
        let sql = format!("SELECT {THREAD_COLUMNS} FROM support_threads t WHERE t.id = $1");
        let row: Option<ThreadRow> = sqlx::query_as(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SupportThread::try_from).transpose()
    }

    async fn list_messages(&self, thread_id: ThreadId) -> SupportResult<Vec<SupportMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT m.id, m.thread_id, m.sender_id, m.sender_type, m.content, m.created_at,
                   COALESCE(
                       array_agg(a.attachment_url::text ORDER BY a.position)
                           FILTER (WHERE a.attachment_url IS NOT NULL),
                       ARRAY[]::text[]
                   ) AS attachments
            FROM support_messages m
            LEFT JOIN support_message_attachments a ON a.message_id = m.id
            WHERE m.thread_id = $1
            GROUP BY m.id
            ORDER BY m.id ASC
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SupportMessage::try_from).collect()
    }

    async fn find_rating(&self, thread_id: ThreadId) -> SupportResult<Option<SupportRating>> {
        let row: Option<RatingRow> = sqlx::query_as(
            r#"
            SELECT id, thread_id, student_id, rating, comment, created_at
            FROM support_ratings
            WHERE thread_id = $1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn student_threads(
        &self,
        student_id: UserId,
        page: PageRequest,
    ) -> SupportResult<Page<SupportThread>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM support_threads WHERE student_id = $1")
                .bind(student_id)
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            r#"
            SELECT {THREAD_COLUMNS}
            FROM support_threads t
            WHERE t.student_id = $1
            ORDER BY t.created_at DESC, t.id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows: Vec<ThreadRow> = sqlx::query_as(&sql)
            .bind(student_id)
            .bind(page.size)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Self::page_of(rows, total)
    }

    async fn search_threads(
        &self,
        filter: &ThreadFilter,
        manager_id: UserId,
        page: PageRequest,
    ) -> SupportResult<Page<SupportThread>> {
        const FILTER: &str = r#"
            FROM support_threads t
            JOIN users u ON u.id = t.student_id
            WHERE ($1::text IS NULL OR t.status = $1)
              AND ($2::bigint IS NULL OR t.course_id = $2)
              AND ($3::text IS NULL OR u.full_name ILIKE $3 OR u.email ILIKE $3)
              AND (NOT $4 OR t.manager_id = $5)
              AND ($6::timestamptz IS NULL OR t.created_at >= $6)
              AND ($7::timestamptz IS NULL OR t.created_at <= $7)
        "#;

        let status = filter.status.map(|s| s.as_str());
        let keyword = filter.student_keyword.as_deref().map(escape_like);

        let count_sql = format!("SELECT COUNT(*) {FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(status)
            .bind(filter.course_id)
            .bind(&keyword)
            .bind(filter.mine_only)
            .bind(manager_id)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {THREAD_COLUMNS} {FILTER} ORDER BY t.created_at DESC, t.id DESC LIMIT $8 OFFSET $9"
        );
        let rows: Vec<ThreadRow> = sqlx::query_as(&sql)
            .bind(status)
            .bind(filter.course_id)
            .bind(&keyword)
            .bind(filter.mine_only)
            .bind(manager_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(page.size)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Self::page_of(rows, total)
    }

    async fn mutate_thread(
        &self,
        thread_id: ThreadId,
        mutation: ThreadMutation,
    ) -> SupportResult<Mutation> {
        let mut tx = self.pool.begin().await?;

        let sql =
            format!("SELECT {THREAD_COLUMNS} FROM support_threads t WHERE t.id = $1 FOR UPDATE");
        let row: Option<ThreadRow> = sqlx::query_as(&sql)
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await?;
        let thread: SupportThread = row
            .ok_or_else(|| SupportError::thread_not_found(thread_id))?
            .try_into()?;

        let rated: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM support_ratings WHERE thread_id = $1)",
        )
        .bind(thread_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut locked = LockedThread { thread, rated };
        // Dropping `tx` on any error below rolls the transaction back
        let (before, write) = apply_mutation(&mut locked, mutation)?;

        let committed = match write {
            ThreadWrite::Unchanged => {
                tx.rollback().await?;
                return Ok(Mutation {
                    after: before.clone(),
                    before,
                    committed: Committed::Nothing,
                });
            }
            ThreadWrite::Thread => {
                Self::save_thread(&mut tx, &locked.thread).await?;
                Committed::Thread
            }
            ThreadWrite::Message(new) => {
                let message = Self::insert_message(&mut tx, thread_id, new).await?;
                Self::save_thread(&mut tx, &locked.thread).await?;
                Committed::Message(message)
            }
            ThreadWrite::Rating(new) => {
                let rating = Self::insert_rating(&mut tx, thread_id, new).await?;
                Committed::Rating(rating)
            }
        };

        tx.commit().await?;
        Ok(Mutation {
            before,
            after: locked.thread,
            committed,
        })
    }

    async fn ping(&self) -> SupportResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Directory for PgSupportStore {
    async fn find_participants(
        &self,
        ids: &[UserId],
    ) -> SupportResult<HashMap<UserId, Participant>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<ParticipantRow> = sqlx::query_as(
            "SELECT id, full_name, email, avatar_url FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.id,
                    Participant {
                        id: r.id,
                        full_name: r.full_name,
                        email: r.email,
                        avatar_url: r.avatar_url,
                    },
                )
            })
            .collect())
    }

    async fn find_courses(&self, ids: &[CourseId]) -> SupportResult<HashMap<CourseId, CourseRef>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<CourseRow> = sqlx::query_as("SELECT id, title FROM courses WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.id, CourseRef { id: r.id, title: r.title }))
            .collect())
    }
}
