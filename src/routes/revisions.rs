use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use super::documents::{to_document_response, DocumentResponse};
use super::reviews::{to_schedule_response, ScheduleResponse};
use super::{to_iso, FileUrlResponse};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::reviews::schedule_status_on;
use crate::lifecycle::revisions::{self, NewRevisionInput, RevisionUpload};
use crate::models::DocumentRevision;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct ApproveRevisionRequest {
    pub comments: Option<String>,
}

#[derive(Deserialize)]
pub struct RejectRevisionRequest {
    pub comments: String,
}

#[derive(Serialize)]
pub struct RevisionResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub revision_number: i32,
    pub change_summary: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub has_file: bool,
    pub status: String,
    pub submitted_by: Option<Uuid>,
    pub submitted_at: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<String>,
    pub review_comments: Option<String>,
    pub is_review_only: bool,
    pub created_by: Uuid,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ApprovalResponse {
    pub revision: RevisionResponse,
    pub document: DocumentResponse,
    pub schedule: ScheduleResponse,
    pub superseded_revision_id: Option<Uuid>,
}

pub async fn list_revisions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<RevisionResponse>>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let rows = revisions::list_revisions(&mut conn, &ctx, document_id)?;
    Ok(Json(rows.into_iter().map(to_revision_response).collect()))
}

pub async fn create_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<RevisionResponse>)> {
    let mut input = NewRevisionInput::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(|n| n.to_string())
                    .ok_or_else(|| AppError::bad_request("filename is required"))?;
                let content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                if data.is_empty() {
                    return Err(AppError::bad_request("file field must not be empty"));
                }
                input.file = Some(RevisionUpload {
                    file_name,
                    content_type,
                    bytes: data.to_vec(),
                });
            }
            Some("change_summary") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid change_summary: {err}"))
                })?;
                let trimmed = value.trim();
                input.change_summary = (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
            Some("is_review_only") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid is_review_only: {err}"))
                })?;
                input.is_review_only = parse_flag(&value)
                    .ok_or_else(|| AppError::bad_request("is_review_only must be true or false"))?;
            }
            _ => {}
        }
    }

    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let revision =
        match revisions::create_revision(&mut conn, state.storage.as_ref(), &ctx, document_id, input)
            .await
        {
            Ok(revision) => revision,
            Err(err) => {
                error!(error = %err, %document_id, "revision upload failed");
                return Err(err.into());
            }
        };
    info!(
        revision_id = %revision.id,
        revision_number = revision.revision_number,
        "revision created"
    );
    Ok((StatusCode::CREATED, Json(to_revision_response(revision))))
}

pub async fn submit_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(revision_id): Path<Uuid>,
) -> AppResult<Json<RevisionResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let revision = revisions::submit_for_review(&mut conn, &ctx, revision_id)?;
    Ok(Json(to_revision_response(revision)))
}

pub async fn approve_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(revision_id): Path<Uuid>,
    payload: Option<Json<ApproveRevisionRequest>>,
) -> AppResult<Json<ApprovalResponse>> {
    let comments = payload
        .and_then(|Json(body)| body.comments)
        .filter(|value| !value.trim().is_empty());
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let outcome = revisions::approve_revision(&mut conn, &ctx, revision_id, comments)?;
    let schedule_status = schedule_status_on(&outcome.schedule, ctx.today);
    Ok(Json(ApprovalResponse {
        revision: to_revision_response(outcome.revision),
        document: to_document_response(outcome.document),
        schedule: to_schedule_response(outcome.schedule, schedule_status),
        superseded_revision_id: outcome.superseded_revision_id,
    }))
}

pub async fn reject_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(revision_id): Path<Uuid>,
    Json(payload): Json<RejectRevisionRequest>,
) -> AppResult<Json<RevisionResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let revision = revisions::reject_revision(&mut conn, &ctx, revision_id, &payload.comments)?;
    Ok(Json(to_revision_response(revision)))
}

pub async fn revision_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(revision_id): Path<Uuid>,
) -> AppResult<Json<FileUrlResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let url =
        revisions::revision_file_url(&mut conn, state.storage.as_ref(), &ctx, revision_id).await?;
    Ok(Json(FileUrlResponse::signed(url)))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Some(false),
        "true" | "1" | "yes" | "on" => Some(true),
        _ => None,
    }
}

pub(crate) fn to_revision_response(revision: DocumentRevision) -> RevisionResponse {
    RevisionResponse {
        id: revision.id,
        document_id: revision.document_id,
        revision_number: revision.revision_number,
        change_summary: revision.change_summary,
        has_file: revision.file_path.is_some(),
        file_name: revision.file_name,
        file_size: revision.file_size,
        file_type: revision.file_type,
        status: revision.status,
        submitted_by: revision.submitted_by,
        submitted_at: revision.submitted_at.map(to_iso),
        reviewed_by: revision.reviewed_by,
        reviewed_at: revision.reviewed_at.map(to_iso),
        review_comments: revision.review_comments,
        is_review_only: revision.is_review_only,
        created_by: revision.created_by,
        created_at: to_iso(revision.created_at),
    }
}
