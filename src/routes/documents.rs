use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use super::revisions::{to_revision_response, RevisionResponse};
use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::documents::{self, DocumentChanges, DocumentFilter, NewDocumentInput};
use crate::lifecycle::status::DocumentStatus;
use crate::models::Document;
use crate::state::AppState;
use crate::utils::json::{classify_nullable, classify_nullable_uuid, NullableValue};

const DEFAULT_REVIEW_PERIOD_MONTHS: i32 = 12;

#[derive(Deserialize, Default)]
pub struct ListDocumentsQuery {
    pub category_id: Option<Uuid>,
    pub status: Option<String>,
    pub owner_id: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub doc_number: String,
    pub title: String,
    pub category_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub review_period_months: Option<i32>,
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub doc_number: String,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub organization_id: Uuid,
    pub current_revision_id: Option<Uuid>,
    pub status: String,
    pub review_period_months: i32,
    pub next_review_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    pub document: DocumentResponse,
    pub current_revision: Option<RevisionResponse>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListDocumentsQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let status = query
        .status
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.trim().parse::<DocumentStatus>())
        .transpose()?;
    let filter = DocumentFilter {
        category_id: query.category_id,
        status,
        owner_id: query.owner_id,
        search_term: query.search,
    };

    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let rows = documents::list_documents(&mut conn, &ctx, &filter)?;
    Ok(Json(rows.into_iter().map(to_document_response).collect()))
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let input = NewDocumentInput {
        doc_number: payload.doc_number,
        title: payload.title,
        category_id: payload.category_id,
        owner_id: payload.owner_id.unwrap_or(user.user_id),
        review_period_months: payload
            .review_period_months
            .unwrap_or(DEFAULT_REVIEW_PERIOD_MONTHS),
        description: payload.description,
    };

    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let document = documents::create_document(&mut conn, &ctx, input).map_err(|err| {
        error!(error = %err, "document creation failed");
        err
    })?;
    Ok((StatusCode::CREATED, Json(to_document_response(document))))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let detail = documents::get_document(&mut conn, &ctx, document_id)?;
    Ok(Json(DocumentDetailResponse {
        document: to_document_response(detail.document),
        current_revision: detail.current_revision.map(to_revision_response),
    }))
}

pub async fn update_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<DocumentResponse>> {
    let changes = parse_document_changes(&body)?;
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let document = documents::update_document(&mut conn, &ctx, document_id, changes)?;
    Ok(Json(to_document_response(document)))
}

pub async fn withdraw_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let document = documents::withdraw_document(&mut conn, &ctx, document_id)?;
    Ok(Json(to_document_response(document)))
}

fn parse_document_changes(body: &Value) -> AppResult<DocumentChanges> {
    let title = match classify_nullable(body.get("title")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("title cannot be null")),
        NullableValue::Set(value) => Some(value),
    };
    let description = classify_nullable(body.get("description"))
        .map_err(AppError::bad_request)?
        .into_change();
    let category_id = classify_nullable_uuid(body.get("category_id"))
        .map_err(AppError::bad_request)?
        .into_change();
    let owner_id = match classify_nullable_uuid(body.get("owner_id"))
        .map_err(AppError::bad_request)?
    {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("owner_id cannot be null")),
        NullableValue::Set(value) => Some(value),
    };
    let review_period_months = match body.get("review_period_months") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_i64()
                .and_then(|months| i32::try_from(months).ok())
                .ok_or_else(|| AppError::bad_request("review_period_months must be an integer"))?,
        ),
    };
    let is_active = match body.get("is_active") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return Err(AppError::bad_request("is_active must be a boolean")),
    };

    Ok(DocumentChanges {
        title,
        description,
        category_id,
        owner_id,
        review_period_months,
        is_active,
    })
}

pub(crate) fn to_document_response(document: Document) -> DocumentResponse {
    DocumentResponse {
        id: document.id,
        doc_number: document.doc_number,
        title: document.title,
        description: document.description,
        category_id: document.category_id,
        owner_id: document.owner_id,
        organization_id: document.organization_id,
        current_revision_id: document.current_revision_id,
        status: document.status,
        review_period_months: document.review_period_months,
        next_review_date: document.next_review_date,
        is_active: document.is_active,
        created_at: to_iso(document.created_at),
        updated_at: to_iso(document.updated_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_body_distinguishes_cleared_fields() {
        let category = Uuid::new_v4();
        let changes = parse_document_changes(&json!({
            "description": null,
            "category_id": category.to_string(),
            "review_period_months": 24,
        }))
        .unwrap();
        assert_eq!(changes.description, Some(None));
        assert_eq!(changes.category_id, Some(Some(category)));
        assert_eq!(changes.review_period_months, Some(24));
        assert!(changes.title.is_none());
    }

    #[test]
    fn owner_cannot_be_cleared() {
        let err = parse_document_changes(&json!({ "owner_id": null })).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
