//! Support chat routes
//!
//! Student endpoints live under `/support/threads`, manager endpoints under
//! `/support/manager/threads`. Handlers only check the caller's role; thread
//! ownership and assignment are enforced by the support service.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use learnhub_shared::{CourseId, ThreadId};
use serde::Deserialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
    support::model::{
        Actor, CreateThreadRequest, MessageDto, RatingDto, RatingRequest, SendMessageRequest,
        ThreadDetail, ThreadFilterRequest, ThreadListResponse, ThreadSummary, TransferRequest,
        UpdateStatusRequest,
    },
};

const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl PageQuery {
    fn resolve(&self) -> (i64, i64) {
        (self.page.unwrap_or(0), self.size.unwrap_or(DEFAULT_PAGE_SIZE))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ManagerThreadsQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
    pub status: Option<String>,
    pub course_id: Option<CourseId>,
    pub student_keyword: Option<String>,
    pub mine_only: Option<bool>,
    /// RFC 3339 lower bound on created_at (inclusive)
    pub from: Option<String>,
    /// RFC 3339 upper bound on created_at (inclusive)
    pub to: Option<String>,
}

fn parse_timestamp(field: &str, value: Option<&str>) -> ApiResult<Option<OffsetDateTime>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("{field} must be an RFC 3339 timestamp"))),
    }
}

// =============================================================================
// Student handlers
// =============================================================================

pub async fn create_thread(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateThreadRequest>,
) -> ApiResult<Json<ThreadDetail>> {
    let student_id = auth_user.require_student()?;
    let detail = state.support.create_thread(student_id, req).await?;
    Ok(Json(detail))
}

pub async fn my_threads(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<ThreadListResponse>> {
    let student_id = auth_user.require_student()?;
    let (page, size) = query.resolve();
    Ok(Json(state.support.student_threads(student_id, page, size).await?))
}

/// Thread detail for either side; clears the caller's unread flag
pub async fn get_thread(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<ThreadId>,
) -> ApiResult<Json<ThreadDetail>> {
    let detail = match auth_user.actor()? {
        Actor::Student(id) => state.support.student_thread_detail(thread_id, id).await?,
        Actor::Manager(id) => state.support.manager_thread_detail(thread_id, id).await?,
    };
    Ok(Json(detail))
}

pub async fn student_send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<ThreadId>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<MessageDto>> {
    let student_id = auth_user.require_student()?;
    let message = state
        .support
        .student_send_message(thread_id, student_id, req)
        .await?;
    Ok(Json(message))
}

pub async fn submit_rating(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<ThreadId>,
    Json(req): Json<RatingRequest>,
) -> ApiResult<Json<RatingDto>> {
    let student_id = auth_user.require_student()?;
    Ok(Json(state.support.submit_rating(thread_id, student_id, req).await?))
}

// =============================================================================
// Manager handlers
// =============================================================================

pub async fn manager_threads(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ManagerThreadsQuery>,
) -> ApiResult<Json<ThreadListResponse>> {
    let manager_id = auth_user.require_manager()?;
    let filter = ThreadFilterRequest {
        status: query.status,
        course_id: query.course_id,
        student_keyword: query.student_keyword,
        mine_only: query.mine_only,
        from: parse_timestamp("from", query.from.as_deref())?,
        to: parse_timestamp("to", query.to.as_deref())?,
    };

    let list = state
        .support
        .manager_threads(
            manager_id,
            filter,
            query.page.unwrap_or(0),
            query.size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(list))
}

pub async fn claim_thread(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<ThreadId>,
) -> ApiResult<Json<ThreadSummary>> {
    let manager_id = auth_user.require_manager()?;
    Ok(Json(state.support.claim_thread(thread_id, manager_id).await?))
}

pub async fn manager_send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<ThreadId>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<MessageDto>> {
    let manager_id = auth_user.require_manager()?;
    let message = state
        .support
        .manager_send_message(thread_id, manager_id, req)
        .await?;
    Ok(Json(message))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<ThreadId>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<ThreadSummary>> {
    let manager_id = auth_user.require_manager()?;
    Ok(Json(state.support.update_status(thread_id, manager_id, req).await?))
}

pub async fn transfer_thread(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<ThreadId>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<Json<ThreadSummary>> {
    let manager_id = auth_user.require_manager()?;
    Ok(Json(state.support.transfer_thread(thread_id, manager_id, req).await?))
}
