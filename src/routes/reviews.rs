use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::documents::{to_document_response, DocumentResponse};
use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::lifecycle::reviews::{self, schedule_status_on, ReviewDueDocument};
use crate::lifecycle::status::ScheduleStatus;
use crate::models::DocumentReviewSchedule;
use crate::state::AppState;

const DEFAULT_DAYS_AHEAD: u32 = 30;

#[derive(Deserialize, Default)]
pub struct DueQuery {
    pub days_ahead: Option<u32>,
}

#[derive(Deserialize, Default)]
pub struct CompleteReviewRequest {
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct ScheduleResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub due_date: NaiveDate,
    pub status: ScheduleStatus,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<String>,
    pub no_changes_needed: bool,
    pub review_notes: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ReviewCompletionResponse {
    pub document: DocumentResponse,
    pub completed_schedule_id: Option<Uuid>,
    pub next_schedule: ScheduleResponse,
}

pub async fn documents_due(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DueQuery>,
) -> AppResult<Json<Vec<ReviewDueDocument>>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let due = reviews::documents_due_for_review(
        &mut conn,
        Some(user.organization_id),
        query.days_ahead.unwrap_or(DEFAULT_DAYS_AHEAD),
        ctx.today,
    )?;
    Ok(Json(due))
}

pub async fn list_schedules(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<ScheduleResponse>>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let rows = reviews::list_schedules(&mut conn, &ctx, document_id)?;
    Ok(Json(
        rows.into_iter()
            .map(|(schedule, status)| to_schedule_response(schedule, status))
            .collect(),
    ))
}

pub async fn complete_review(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    payload: Option<Json<CompleteReviewRequest>>,
) -> AppResult<Json<ReviewCompletionResponse>> {
    let notes = payload
        .and_then(|Json(body)| body.notes)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let completion = reviews::complete_review_no_changes(&mut conn, &ctx, document_id, notes)?;
    let status = schedule_status_on(&completion.next_schedule, ctx.today);
    Ok(Json(ReviewCompletionResponse {
        document: to_document_response(completion.document),
        completed_schedule_id: completion.completed_schedule_id,
        next_schedule: to_schedule_response(completion.next_schedule, status),
    }))
}

pub(crate) fn to_schedule_response(
    schedule: DocumentReviewSchedule,
    status: ScheduleStatus,
) -> ScheduleResponse {
    ScheduleResponse {
        id: schedule.id,
        document_id: schedule.document_id,
        due_date: schedule.due_date,
        status,
        completed_by: schedule.completed_by,
        completed_at: schedule.completed_at.map(to_iso),
        no_changes_needed: schedule.no_changes_needed,
        review_notes: schedule.review_notes,
        created_at: to_iso(schedule.created_at),
    }
}
