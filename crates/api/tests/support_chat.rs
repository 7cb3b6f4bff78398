//! Support chat flows against the in-memory store with a recording gateway

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use learnhub_api::support::model::{
    CourseRef, CreateThreadRequest, MessageDto, Participant, RatingDto, RatingRequest,
    SendMessageRequest, ThreadDetail, ThreadFilterRequest, ThreadSummary, TransferRequest,
    UpdateStatusRequest,
};
use learnhub_api::support::store::{mutation, ThreadWrite};
use learnhub_api::support::{
    Directory, MemoryStore, RealtimeGateway, SupportError, SupportService, SupportStore,
};
use learnhub_shared::{CourseId, SenderType, ThreadId, ThreadStatus, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const STUDENT: UserId = 1;
const MANAGER: UserId = 2;
const OTHER_MANAGER: UserId = 3;
const OTHER_STUDENT: UserId = 5;
const COURSE: CourseId = 7;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Created(ThreadId),
    Appended(ThreadId, SenderType),
    Updated(ThreadId, ThreadStatus),
    Rated(ThreadId, i16),
    Transferred(ThreadId, Option<UserId>),
}

#[derive(Default)]
struct RecordingGateway {
    events: Mutex<Vec<Event>>,
}

impl RecordingGateway {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl RealtimeGateway for RecordingGateway {
    async fn thread_created(&self, detail: &ThreadDetail) {
        self.push(Event::Created(detail.summary.id));
    }
    async fn message_appended(&self, thread_id: ThreadId, message: &MessageDto) {
        self.push(Event::Appended(thread_id, message.sender_type));
    }
    async fn thread_updated(&self, summary: &ThreadSummary) {
        self.push(Event::Updated(summary.id, summary.status));
    }
    async fn thread_rated(&self, thread_id: ThreadId, rating: &RatingDto) {
        self.push(Event::Rated(thread_id, rating.rating));
    }
    async fn thread_transferred(&self, summary: &ThreadSummary) {
        self.push(Event::Transferred(summary.id, summary.manager.as_ref().map(|m| m.id)));
    }
}

struct Harness {
    service: SupportService,
    store: Arc<MemoryStore>,
    gateway: Arc<RecordingGateway>,
}

fn person(id: UserId, name: &str, email: &str) -> Participant {
    Participant {
        id,
        full_name: Some(name.to_string()),
        email: Some(email.to_string()),
        avatar_url: None,
    }
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(person(STUDENT, "Lan Nguyen", "lan@learnhub.test")).await;
    store.insert_user(person(MANAGER, "Minh Tran", "minh@learnhub.test")).await;
    store.insert_user(person(OTHER_MANAGER, "Hoa Le", "hoa@learnhub.test")).await;
    store.insert_user(person(OTHER_STUDENT, "Quang Pham", "quang@learnhub.test")).await;
    store
        .insert_course(CourseRef {
            id: COURSE,
            title: "IELTS 7.0".to_string(),
        })
        .await;
    store
}

async fn harness() -> Harness {
    let store = seeded_store().await;
    let gateway = Arc::new(RecordingGateway::default());
    let service = SupportService::new(store.clone(), store.clone(), gateway.clone());
    Harness {
        service,
        store,
        gateway,
    }
}

fn ask(topic: &str, message: &str) -> CreateThreadRequest {
    CreateThreadRequest {
        topic: topic.to_string(),
        message: message.to_string(),
        ..Default::default()
    }
}

fn say(content: &str) -> SendMessageRequest {
    SendMessageRequest {
        content: content.to_string(),
        attachments: Vec::new(),
    }
}

fn status(value: &str) -> UpdateStatusRequest {
    UpdateStatusRequest {
        status: value.to_string(),
        note: None,
    }
}

fn rate(value: i32, comment: Option<&str>) -> RatingRequest {
    RatingRequest {
        rating: Some(value),
        comment: comment.map(str::to_string),
    }
}

impl Harness {
    fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.gateway.events.lock().unwrap())
    }

    async fn open_thread(&self, student_id: UserId) -> ThreadId {
        let detail = self
            .service
            .create_thread(student_id, ask("course_advice", "Xin chào"))
            .await
            .unwrap();
        detail.summary.id
    }

    async fn in_progress_thread(&self) -> ThreadId {
        let id = self.open_thread(STUDENT).await;
        self.service.claim_thread(id, MANAGER).await.unwrap();
        id
    }

    async fn closed_thread(&self) -> ThreadId {
        let id = self.in_progress_thread().await;
        self.service.update_status(id, MANAGER, status("closed")).await.unwrap();
        self.take_events();
        id
    }

    async fn thread(&self, id: ThreadId) -> learnhub_api::support::model::SupportThread {
        self.store.find_thread(id).await.unwrap().unwrap()
    }
}

// =============================================================================
// Creating threads
// =============================================================================

#[tokio::test]
async fn test_create_thread_opens_new_thread_with_first_message() {
    let h = harness().await;

    let detail = h
        .service
        .create_thread(
            STUDENT,
            CreateThreadRequest {
                course_id: Some(COURSE),
                ..ask("course_advice", "Tư vấn giúp mình chọn khóa IELTS.")
            },
        )
        .await
        .unwrap();

    let summary = &detail.summary;
    assert_eq!(summary.status, ThreadStatus::New);
    assert!(summary.unread_for_manager);
    assert!(!summary.unread_for_student);
    assert!(summary.manager.is_none());
    assert_eq!(summary.course_title.as_deref(), Some("IELTS 7.0"));
    assert_eq!(summary.student.full_name.as_deref(), Some("Lan Nguyen"));
    assert_eq!(summary.last_sender, Some(SenderType::Student));
    assert_eq!(
        summary.last_message_preview.as_deref(),
        Some("Tư vấn giúp mình chọn khóa IELTS.")
    );

    assert_eq!(detail.messages.len(), 1);
    assert_eq!(detail.messages[0].sender_type, SenderType::Student);
    assert!(detail.rating.is_none());

    assert_eq!(
        h.take_events(),
        vec![
            Event::Created(summary.id),
            Event::Appended(summary.id, SenderType::Student)
        ]
    );
}

#[tokio::test]
async fn test_create_thread_validation() {
    let h = harness().await;

    let unknown_student = h.service.create_thread(404, ask("t", "hi")).await;
    assert!(matches!(unknown_student, Err(SupportError::NotFound(_))));

    let blank_topic = h.service.create_thread(STUDENT, ask("   ", "hi")).await;
    assert!(matches!(blank_topic, Err(SupportError::InvalidArgument(_))));

    let empty_message = h.service.create_thread(STUDENT, ask("t", "  \n ")).await;
    assert!(matches!(empty_message, Err(SupportError::InvalidArgument(_))));

    let unknown_course = h
        .service
        .create_thread(
            STUDENT,
            CreateThreadRequest {
                course_id: Some(99),
                ..ask("t", "hi")
            },
        )
        .await;
    assert!(matches!(unknown_course, Err(SupportError::NotFound(_))));

    let listed = h.service.student_threads(STUDENT, 0, 20).await.unwrap();
    assert_eq!(listed.total_elements, 0);
    assert!(h.take_events().is_empty());
}

// =============================================================================
// Messages
// =============================================================================

#[tokio::test]
async fn test_manager_reply_marks_student_unread() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    h.take_events();

    let message = h
        .service
        .manager_send_message(id, MANAGER, say("Chào bạn, mình sẽ hỗ trợ ngay."))
        .await
        .unwrap();
    assert_eq!(message.sender_type, SenderType::Manager);
    assert_eq!(message.sender.map(|s| s.id), Some(MANAGER));

    let thread = h.thread(id).await;
    assert!(thread.has_unread_for_student);
    assert!(!thread.has_unread_for_manager);
    assert_eq!(thread.last_sender, Some(SenderType::Manager));

    assert_eq!(
        h.take_events(),
        vec![
            Event::Appended(id, SenderType::Manager),
            Event::Updated(id, ThreadStatus::InProgress)
        ]
    );
}

#[tokio::test]
async fn test_first_manager_reply_assigns_manager() {
    let h = harness().await;
    let id = h.open_thread(STUDENT).await;

    h.service
        .manager_send_message(id, MANAGER, say("Mình nhận nhé"))
        .await
        .unwrap();

    let thread = h.thread(id).await;
    assert_eq!(thread.manager_id, Some(MANAGER));
    assert_eq!(thread.status, ThreadStatus::InProgress);

    let other = h
        .service
        .manager_send_message(id, OTHER_MANAGER, say("Mình cũng vào"))
        .await;
    assert!(matches!(other, Err(SupportError::Forbidden(_))));
}

#[tokio::test]
async fn test_student_reply_resumes_waiting_thread() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    h.service
        .update_status(id, MANAGER, status("waiting_student"))
        .await
        .unwrap();
    h.take_events();

    h.service
        .student_send_message(id, STUDENT, say("Mình gửi thêm thông tin"))
        .await
        .unwrap();

    assert_eq!(h.thread(id).await.status, ThreadStatus::InProgress);
    assert_eq!(
        h.take_events(),
        vec![
            Event::Appended(id, SenderType::Student),
            Event::Updated(id, ThreadStatus::InProgress)
        ]
    );
}

#[tokio::test]
async fn test_repeat_student_message_skips_thread_update() {
    let h = harness().await;
    let id = h.open_thread(STUDENT).await;
    h.take_events();

    h.service
        .student_send_message(id, STUDENT, say("Còn nữa"))
        .await
        .unwrap();

    // Flags and status were already in this state
    assert_eq!(h.take_events(), vec![Event::Appended(id, SenderType::Student)]);
}

#[tokio::test]
async fn test_student_cannot_post_to_foreign_thread() {
    let h = harness().await;
    let id = h.open_thread(STUDENT).await;

    let result = h
        .service
        .student_send_message(id, OTHER_STUDENT, say("hello"))
        .await;
    assert!(matches!(result, Err(SupportError::Forbidden(_))));
    assert_eq!(h.store.list_messages(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_closed_thread_rejects_messages() {
    let h = harness().await;
    let id = h.closed_thread().await;
    let before = h.store.list_messages(id).await.unwrap();

    let student = h.service.student_send_message(id, STUDENT, say("Còn ai không?")).await;
    let manager = h.service.manager_send_message(id, MANAGER, say("Đã đóng")).await;

    assert!(matches!(student, Err(SupportError::Conflict(_))));
    assert!(matches!(manager, Err(SupportError::Conflict(_))));
    assert_eq!(h.store.list_messages(id).await.unwrap(), before);
    assert!(h.take_events().is_empty());
}

#[tokio::test]
async fn test_message_on_unknown_thread_is_not_found() {
    let h = harness().await;
    let result = h.service.student_send_message(999, STUDENT, say("hi")).await;
    assert!(matches!(result, Err(SupportError::NotFound(_))));
}

#[tokio::test]
async fn test_attachments_are_normalized() {
    let h = harness().await;
    let id = h.open_thread(STUDENT).await;

    let message = h
        .service
        .student_send_message(
            id,
            STUDENT,
            SendMessageRequest {
                content: "Ảnh chụp màn hình".to_string(),
                attachments: vec![
                    " https://cdn.test/a.png ".to_string(),
                    "".to_string(),
                    "https://cdn.test/a.png".to_string(),
                    "https://cdn.test/b.png".to_string(),
                ],
            },
        )
        .await
        .unwrap();

    assert_eq!(
        message.attachments,
        vec!["https://cdn.test/a.png", "https://cdn.test/b.png"]
    );
}

// =============================================================================
// Status and assignment
// =============================================================================

#[tokio::test]
async fn test_close_thread_stamps_closed_at() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    h.take_events();

    let summary = h
        .service
        .update_status(id, MANAGER, status("closed"))
        .await
        .unwrap();

    assert_eq!(summary.status, ThreadStatus::Closed);
    assert!(summary.closed_at.is_some());
    assert_eq!(summary.closed_at, Some(summary.updated_at));
    assert_eq!(h.take_events(), vec![Event::Updated(id, ThreadStatus::Closed)]);
}

#[tokio::test]
async fn test_reclosing_is_a_noop() {
    let h = harness().await;
    let id = h.closed_thread().await;
    let before = h.thread(id).await;

    let summary = h
        .service
        .update_status(id, MANAGER, status("  CLOSED "))
        .await
        .unwrap();

    assert_eq!(summary.closed_at, before.closed_at);
    assert_eq!(summary.updated_at, before.updated_at);
    assert!(h.take_events().is_empty());
}

#[tokio::test]
async fn test_status_update_guards() {
    let h = harness().await;
    let id = h.in_progress_thread().await;

    let invalid = h.service.update_status(id, MANAGER, status("archived")).await;
    assert!(matches!(invalid, Err(SupportError::InvalidArgument(_))));

    let stranger = h.service.update_status(id, OTHER_MANAGER, status("closed")).await;
    assert!(matches!(stranger, Err(SupportError::Forbidden(_))));

    let back_to_new = h.service.update_status(id, MANAGER, status("new")).await;
    assert!(matches!(back_to_new, Err(SupportError::Conflict(_))));

    h.service.update_status(id, MANAGER, status("closed")).await.unwrap();
    let reopen = h.service.update_status(id, MANAGER, status("in_progress")).await;
    assert!(matches!(reopen, Err(SupportError::Conflict(_))));

    let thread = h.thread(id).await;
    assert_eq!(thread.status, ThreadStatus::Closed);
    assert!(thread.closed_at.is_some());
}

#[tokio::test]
async fn test_claim_thread() {
    let h = harness().await;
    let id = h.open_thread(STUDENT).await;
    h.take_events();

    let summary = h.service.claim_thread(id, MANAGER).await.unwrap();
    assert_eq!(summary.status, ThreadStatus::InProgress);
    assert_eq!(summary.manager.map(|m| m.id), Some(MANAGER));
    assert_eq!(h.take_events(), vec![Event::Updated(id, ThreadStatus::InProgress)]);

    // Claiming again is idempotent for the holder
    h.service.claim_thread(id, MANAGER).await.unwrap();
    assert!(h.take_events().is_empty());

    let taken = h.service.claim_thread(id, OTHER_MANAGER).await;
    assert!(matches!(taken, Err(SupportError::Conflict(_))));
}

#[tokio::test]
async fn test_transfer_thread() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    h.service
        .update_status(id, MANAGER, status("waiting_student"))
        .await
        .unwrap();
    h.take_events();

    let summary = h
        .service
        .transfer_thread(
            id,
            MANAGER,
            TransferRequest {
                new_manager_id: Some(OTHER_MANAGER),
            },
        )
        .await
        .unwrap();

    assert_eq!(summary.status, ThreadStatus::InProgress);
    assert_eq!(summary.manager.map(|m| m.id), Some(OTHER_MANAGER));
    assert_eq!(
        h.take_events(),
        vec![
            Event::Updated(id, ThreadStatus::InProgress),
            Event::Transferred(id, Some(OTHER_MANAGER))
        ]
    );

    // The previous manager no longer holds the thread
    let again = h
        .service
        .transfer_thread(id, MANAGER, TransferRequest { new_manager_id: Some(MANAGER) })
        .await;
    assert!(matches!(again, Err(SupportError::Forbidden(_))));
}

#[tokio::test]
async fn test_transfer_guards() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    h.take_events();

    let missing = h
        .service
        .transfer_thread(id, MANAGER, TransferRequest::default())
        .await;
    assert!(matches!(missing, Err(SupportError::InvalidArgument(_))));

    let unknown = h
        .service
        .transfer_thread(id, MANAGER, TransferRequest { new_manager_id: Some(404) })
        .await;
    assert!(matches!(unknown, Err(SupportError::NotFound(_))));

    let to_self = h
        .service
        .transfer_thread(id, MANAGER, TransferRequest { new_manager_id: Some(MANAGER) })
        .await
        .unwrap();
    assert_eq!(to_self.manager.map(|m| m.id), Some(MANAGER));
    assert!(h.take_events().is_empty());

    h.service.update_status(id, MANAGER, status("closed")).await.unwrap();
    let closed = h
        .service
        .transfer_thread(id, MANAGER, TransferRequest { new_manager_id: Some(OTHER_MANAGER) })
        .await;
    assert!(matches!(closed, Err(SupportError::Conflict(_))));
}

// =============================================================================
// Reading
// =============================================================================

#[tokio::test]
async fn test_detail_clears_reader_flag_only() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    h.service
        .manager_send_message(id, MANAGER, say("Bạn cần gì?"))
        .await
        .unwrap();
    h.service
        .student_send_message(id, STUDENT, say("Mình cần lịch học"))
        .await
        .unwrap();
    h.service
        .manager_send_message(id, MANAGER, say("Đây nhé"))
        .await
        .unwrap();
    let before = h.thread(id).await;
    assert!(before.has_unread_for_student);

    let detail = h.service.student_thread_detail(id, STUDENT).await.unwrap();
    assert_eq!(detail.messages.len(), 4);
    assert!(!detail.summary.unread_for_student);

    let after = h.thread(id).await;
    assert!(!after.has_unread_for_student);
    assert_eq!(after.updated_at, before.updated_at);

    let foreign = h.service.student_thread_detail(id, OTHER_STUDENT).await;
    assert!(matches!(foreign, Err(SupportError::NotFound(_))));
}

#[tokio::test]
async fn test_only_assigned_manager_clears_manager_flag() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    assert!(h.thread(id).await.has_unread_for_manager);

    let detail = h.service.manager_thread_detail(id, OTHER_MANAGER).await.unwrap();
    assert!(detail.summary.unread_for_manager);
    assert!(h.thread(id).await.has_unread_for_manager);

    h.service.manager_thread_detail(id, MANAGER).await.unwrap();
    assert!(!h.thread(id).await.has_unread_for_manager);
}

#[tokio::test]
async fn test_ledger_ids_strictly_increase() {
    let h = harness().await;
    let id = h.in_progress_thread().await;
    for i in 0..5 {
        h.service
            .student_send_message(id, STUDENT, say(&format!("message {i}")))
            .await
            .unwrap();
        h.service
            .manager_send_message(id, MANAGER, say(&format!("reply {i}")))
            .await
            .unwrap();
    }

    let detail = h.service.student_thread_detail(id, STUDENT).await.unwrap();
    assert_eq!(detail.messages.len(), 11);
    assert!(detail.messages.windows(2).all(|w| w[0].id < w[1].id));
}

#[tokio::test]
async fn test_student_threads_paging() {
    let h = harness().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(h.open_thread(STUDENT).await);
    }
    h.open_thread(OTHER_STUDENT).await;

    let first = h.service.student_threads(STUDENT, 0, 2).await.unwrap();
    assert_eq!(first.total_elements, 3);
    assert_eq!(first.size, 2);
    assert_eq!(
        first.data.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![ids[2], ids[1]]
    );

    let second = h.service.student_threads(STUDENT, 1, 2).await.unwrap();
    assert_eq!(second.data.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[0]]);

    let clamped = h.service.student_threads(STUDENT, -3, 500).await.unwrap();
    assert_eq!((clamped.page, clamped.size), (0, 50));
}

#[tokio::test]
async fn test_manager_thread_filters() {
    let h = harness().await;
    let mine = h.in_progress_thread().await;
    let unassigned = h.open_thread(OTHER_STUDENT).await;

    let all = h
        .service
        .manager_threads(MANAGER, ThreadFilterRequest::default(), 0, 20)
        .await
        .unwrap();
    assert_eq!(all.total_elements, 2);

    let only_mine = h
        .service
        .manager_threads(
            MANAGER,
            ThreadFilterRequest {
                mine_only: Some(true),
                ..Default::default()
            },
            0,
            20,
        )
        .await
        .unwrap();
    assert_eq!(only_mine.data.iter().map(|t| t.id).collect::<Vec<_>>(), vec![mine]);

    let by_status = h
        .service
        .manager_threads(
            MANAGER,
            ThreadFilterRequest {
                status: Some(" new ".to_string()),
                ..Default::default()
            },
            0,
            20,
        )
        .await
        .unwrap();
    assert_eq!(by_status.data.iter().map(|t| t.id).collect::<Vec<_>>(), vec![unassigned]);

    let by_keyword = h
        .service
        .manager_threads(
            MANAGER,
            ThreadFilterRequest {
                student_keyword: Some("QUANG@".to_string()),
                ..Default::default()
            },
            0,
            20,
        )
        .await
        .unwrap();
    assert_eq!(by_keyword.data.iter().map(|t| t.id).collect::<Vec<_>>(), vec![unassigned]);

    let bad_status = h
        .service
        .manager_threads(
            MANAGER,
            ThreadFilterRequest {
                status: Some("pending".to_string()),
                ..Default::default()
            },
            0,
            20,
        )
        .await;
    assert!(matches!(bad_status, Err(SupportError::InvalidArgument(_))));
}

// =============================================================================
// Ratings
// =============================================================================

#[tokio::test]
async fn test_rating_closed_thread_once() {
    let h = harness().await;
    let id = h.closed_thread().await;

    let rating = h
        .service
        .submit_rating(id, STUDENT, rate(5, Some("Rất hài lòng")))
        .await
        .unwrap();
    assert_eq!(rating.rating, 5);
    assert_eq!(rating.comment.as_deref(), Some("Rất hài lòng"));
    assert_eq!(h.take_events(), vec![Event::Rated(id, 5)]);

    let second = h.service.submit_rating(id, STUDENT, rate(4, None)).await;
    assert!(matches!(second, Err(SupportError::Conflict(_))));
    assert_eq!(h.store.find_rating(id).await.unwrap().map(|r| r.rating), Some(5));

    let detail = h.service.student_thread_detail(id, STUDENT).await.unwrap();
    assert_eq!(detail.rating.map(|r| r.id), Some(rating.id));
}

#[tokio::test]
async fn test_rating_guards() {
    let h = harness().await;
    let open = h.in_progress_thread().await;

    let not_closed = h.service.submit_rating(open, STUDENT, rate(5, None)).await;
    assert!(matches!(not_closed, Err(SupportError::Conflict(_))));
    assert!(h.store.find_rating(open).await.unwrap().is_none());

    let closed = h.closed_thread().await;
    let foreign = h.service.submit_rating(closed, OTHER_STUDENT, rate(5, None)).await;
    assert!(matches!(foreign, Err(SupportError::NotFound(_))));

    for bad in [0, 6, -1] {
        let result = h.service.submit_rating(closed, STUDENT, rate(bad, None)).await;
        assert!(matches!(result, Err(SupportError::InvalidArgument(_))));
    }
    let missing = h
        .service
        .submit_rating(closed, STUDENT, RatingRequest::default())
        .await;
    assert!(matches!(missing, Err(SupportError::InvalidArgument(_))));
    assert!(h.store.find_rating(closed).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rating_comment_longer_than_column_rejected() {
    let h = harness().await;
    let id = h.closed_thread().await;

    let too_long = "a".repeat(1001);
    let result = h.service.submit_rating(id, STUDENT, rate(5, Some(&too_long))).await;
    assert!(matches!(result, Err(SupportError::InvalidArgument(_))));
    assert!(h.store.find_rating(id).await.unwrap().is_none());
    assert!(h.take_events().is_empty());

    let at_limit = "a".repeat(1000);
    let rating = h
        .service
        .submit_rating(id, STUDENT, rate(5, Some(&at_limit)))
        .await
        .unwrap();
    assert_eq!(rating.comment.map(|c| c.len()), Some(1000));
}

// =============================================================================
// Concurrency and deadlines
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_held_thread_lock_does_not_block_other_threads() {
    let h = harness().await;
    let held = h.in_progress_thread().await;
    let free = h.in_progress_thread().await;

    // Park a mutation on `held` while it owns the thread lock
    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let store = h.store.clone();
    let parked = tokio::spawn(async move {
        store
            .mutate_thread(
                held,
                mutation(move |_locked| {
                    let _ = entered_tx.send(());
                    let _ = release_rx.recv();
                    Ok(ThreadWrite::Unchanged)
                }),
            )
            .await
    });
    entered_rx.await.unwrap();

    let quick = SupportService::new(h.store.clone(), h.store.clone(), h.gateway.clone())
        .with_deadline(Duration::from_millis(500));

    let message = quick
        .manager_send_message(free, MANAGER, say("still moving"))
        .await
        .unwrap();
    assert_eq!(message.thread_id, free);

    let blocked = quick
        .with_deadline(Duration::from_millis(50))
        .manager_send_message(held, MANAGER, say("waits for the lock"))
        .await;
    assert_eq!(blocked.unwrap_err(), SupportError::Timeout);

    release_tx.send(()).unwrap();
    parked.await.unwrap().unwrap();
    assert_eq!(h.store.list_messages(held).await.unwrap().len(), 1);
    assert_eq!(h.store.list_messages(free).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ratings_keep_exactly_one() {
    let h = harness().await;
    let id = h.closed_thread().await;

    let tasks: Vec<_> = (1..=8)
        .map(|i| {
            let service = h.service.clone();
            tokio::spawn(async move { service.submit_rating(id, STUDENT, rate(1 + i % 5, None)).await })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(SupportError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(accepted, 1);
    assert!(h.store.find_rating(id).await.unwrap().is_some());
    assert_eq!(h.take_events().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_keep_ledger_ordered() {
    let h = harness().await;
    let id = h.in_progress_thread().await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let service = h.service.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    service.student_send_message(id, STUDENT, say(&format!("s{i}"))).await
                } else {
                    service.manager_send_message(id, MANAGER, say(&format!("m{i}"))).await
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let messages = h.store.list_messages(id).await.unwrap();
    assert_eq!(messages.len(), 21);
    assert!(messages.windows(2).all(|w| w[0].id < w[1].id));

    // The summary reflects whichever message was appended last
    let thread = h.thread(id).await;
    let last = messages.last().unwrap();
    assert_eq!(thread.last_sender, Some(last.sender_type));
    assert_eq!(thread.last_message_at, Some(last.created_at));
}

/// Directory that answers slower than any sane deadline
struct SlowDirectory {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl Directory for SlowDirectory {
    async fn find_participants(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, Participant>, SupportError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_participants(ids).await
    }

    async fn find_courses(
        &self,
        ids: &[CourseId],
    ) -> Result<HashMap<CourseId, CourseRef>, SupportError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_courses(ids).await
    }
}

#[tokio::test]
async fn test_operation_past_deadline_times_out_without_writes() {
    let store = seeded_store().await;
    let gateway = Arc::new(RecordingGateway::default());
    let directory = Arc::new(SlowDirectory {
        inner: store.clone(),
        delay: Duration::from_millis(200),
    });
    let service = SupportService::new(store.clone(), directory, gateway.clone())
        .with_deadline(Duration::from_millis(20));

    let result = service.create_thread(STUDENT, ask("t", "hi")).await;
    assert_eq!(result.unwrap_err(), SupportError::Timeout);

    let listed = store
        .student_threads(STUDENT, Default::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 0);
    assert!(gateway.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_rendering_lookup_does_not_fail_committed_write() {
    let store = seeded_store().await;
    let fast = SupportService::new(store.clone(), store.clone(), Arc::new(RecordingGateway::default()));
    let id = fast
        .create_thread(STUDENT, ask("t", "hi"))
        .await
        .unwrap()
        .summary
        .id;

    let directory = Arc::new(SlowDirectory {
        inner: store.clone(),
        delay: Duration::from_millis(200),
    });
    let slow = SupportService::new(store.clone(), directory, Arc::new(RecordingGateway::default()))
        .with_deadline(Duration::from_millis(20));

    // The append commits; the sender renders without directory details
    let message = slow.student_send_message(id, STUDENT, say("again")).await.unwrap();
    assert_eq!(message.sender, Some(Participant::unresolved(STUDENT)));
    assert_eq!(store.list_messages(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_subscription_authorization() {
    use learnhub_api::support::model::Actor;

    let h = harness().await;
    let id = h.open_thread(STUDENT).await;

    assert!(h.service.authorize_subscription(id, Actor::Student(STUDENT)).await.is_ok());
    assert!(h.service.authorize_subscription(id, Actor::Manager(OTHER_MANAGER)).await.is_ok());
    assert!(matches!(
        h.service.authorize_subscription(id, Actor::Student(OTHER_STUDENT)).await,
        Err(SupportError::Forbidden(_))
    ));
    assert!(matches!(
        h.service.authorize_subscription(999, Actor::Manager(MANAGER)).await,
        Err(SupportError::NotFound(_))
    ));
}
