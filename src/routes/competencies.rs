use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{to_iso, FileUrlResponse};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::competencies::{
    self, CompetencyFilter, CompetencySubmission, CompetencyView,
};
use crate::lifecycle::status::CompetencyStatus;
use crate::models::{CompetencyHistoryEntry, EmployeeCompetency};
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct ListCompetenciesQuery {
    pub user_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct UpsertCompetencyRequest {
    pub user_id: Option<Uuid>,
    pub competency_id: Uuid,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub document_name: Option<String>,
    pub status: Option<CompetencyStatus>,
    #[serde(default)]
    pub witness_checked: bool,
    pub witnessed_by: Option<Uuid>,
    pub witness_notes: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyCompetencyRequest {
    pub approved: bool,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RequestChangesRequest {
    pub comment: String,
}

#[derive(Serialize)]
pub struct CompetencyResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub competency_id: Uuid,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub document_name: Option<String>,
    pub status: String,
    pub effective_status: CompetencyStatus,
    pub witness_checked: bool,
    pub witnessed_by: Option<Uuid>,
    pub witnessed_at: Option<String>,
    pub witness_notes: Option<String>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct HistoryEntryResponse {
    pub id: Uuid,
    pub action: String,
    pub status: String,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub notes: Option<String>,
    pub changed_by: Option<Uuid>,
    pub created_at: String,
}

pub async fn list_competencies(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListCompetenciesQuery>,
) -> AppResult<Json<Vec<CompetencyResponse>>> {
    let status = query
        .status
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.trim().parse::<CompetencyStatus>())
        .transpose()?;
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let rows = competencies::list_competencies(
        &mut conn,
        &ctx,
        &CompetencyFilter {
            user_id: query.user_id,
            status,
        },
    )?;
    Ok(Json(rows.into_iter().map(to_view_response).collect()))
}

pub async fn upsert_competency(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpsertCompetencyRequest>,
) -> AppResult<Json<CompetencyResponse>> {
    let submission = CompetencySubmission {
        user_id: payload.user_id.unwrap_or(user.user_id),
        competency_id: payload.competency_id,
        value: payload.value,
        expiry_date: payload.expiry_date,
        document_url: payload.document_url,
        document_name: payload.document_name,
        status: payload.status,
        witness_checked: payload.witness_checked,
        witnessed_by: payload.witnessed_by,
        witness_notes: payload.witness_notes,
        notes: payload.notes,
    };
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let competency = competencies::upsert_competency(&mut conn, &ctx, submission)?;
    to_competency_response(competency, ctx.today).map(Json)
}

pub async fn verify_competency(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(competency_id): Path<Uuid>,
    Json(payload): Json<VerifyCompetencyRequest>,
) -> AppResult<Json<CompetencyResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let competency = competencies::verify_competency(
        &mut conn,
        &ctx,
        competency_id,
        payload.approved,
        payload.reason,
    )?;
    to_competency_response(competency, ctx.today).map(Json)
}

pub async fn request_changes(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(competency_id): Path<Uuid>,
    Json(payload): Json<RequestChangesRequest>,
) -> AppResult<Json<CompetencyResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let competency =
        competencies::request_changes(&mut conn, &ctx, competency_id, &payload.comment)?;
    to_competency_response(competency, ctx.today).map(Json)
}

pub async fn competency_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(competency_id): Path<Uuid>,
) -> AppResult<Json<Vec<HistoryEntryResponse>>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let rows = competencies::competency_history(&mut conn, &ctx, competency_id)?;
    Ok(Json(rows.into_iter().map(to_history_response).collect()))
}

pub async fn competency_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(competency_id): Path<Uuid>,
) -> AppResult<Json<FileUrlResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let url = competencies::competency_document_url(
        &mut conn,
        state.storage.as_ref(),
        &ctx,
        competency_id,
    )
    .await?;
    Ok(Json(FileUrlResponse::signed(url)))
}

fn to_competency_response(
    competency: EmployeeCompetency,
    today: NaiveDate,
) -> AppResult<CompetencyResponse> {
    let stored: CompetencyStatus = competency
        .status
        .parse()
        .map_err(|err| AppError::internal(format!("corrupt competency status: {err}")))?;
    let effective_status = competencies::effective_status(stored, competency.expiry_date, today);
    Ok(to_view_response(CompetencyView {
        competency,
        effective_status,
    }))
}

fn to_view_response(view: CompetencyView) -> CompetencyResponse {
    let CompetencyView {
        competency,
        effective_status,
    } = view;
    CompetencyResponse {
        id: competency.id,
        user_id: competency.user_id,
        competency_id: competency.competency_id,
        value: competency.value,
        expiry_date: competency.expiry_date,
        document_url: competency.document_url,
        document_name: competency.document_name,
        status: competency.status,
        effective_status,
        witness_checked: competency.witness_checked,
        witnessed_by: competency.witnessed_by,
        witnessed_at: competency.witnessed_at.map(to_iso),
        witness_notes: competency.witness_notes,
        verified_by: competency.verified_by,
        verified_at: competency.verified_at.map(to_iso),
        notes: competency.notes,
        created_at: to_iso(competency.created_at),
        updated_at: to_iso(competency.updated_at),
    }
}

fn to_history_response(entry: CompetencyHistoryEntry) -> HistoryEntryResponse {
    HistoryEntryResponse {
        id: entry.id,
        action: entry.action,
        status: entry.status,
        value: entry.value,
        expiry_date: entry.expiry_date,
        document_url: entry.document_url,
        notes: entry.notes,
        changed_by: entry.changed_by,
        created_at: to_iso(entry.created_at),
    }
}
