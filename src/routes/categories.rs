use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::categories::{self, CategoryChanges, CategoryRemoval};
use crate::models::DocumentCategory;
use crate::state::AppState;
use crate::utils::json::{classify_nullable, NullableValue};

#[derive(Deserialize, Default)]
pub struct ListCategoriesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct ReorderCategoriesRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct DeleteCategoryResponse {
    pub id: Uuid,
    pub deleted: bool,
    pub deactivated: bool,
}

pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<ListCategoriesQuery>,
) -> AppResult<Json<Vec<CategoryResponse>>> {
    let mut conn = state.db()?;
    let rows = categories::list_categories(&mut conn, query.include_inactive)?;
    Ok(Json(rows.into_iter().map(to_category_response).collect()))
}

pub async fn create_category(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCategoryRequest>,
) -> AppResult<(StatusCode, Json<CategoryResponse>)> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let category =
        categories::create_category(&mut conn, &ctx, &payload.name, payload.description)?;
    Ok((StatusCode::CREATED, Json(to_category_response(category))))
}

pub async fn update_category(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(category_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<CategoryResponse>> {
    let name = match classify_nullable(body.get("name")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("name cannot be null")),
        NullableValue::Set(value) => Some(value),
    };
    let description = classify_nullable(body.get("description"))
        .map_err(AppError::bad_request)?
        .into_change();
    let is_active = match body.get("is_active") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(other) => {
            return Err(AppError::bad_request(format!(
                "is_active must be a boolean, got {other}"
            )))
        }
    };

    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let category = categories::update_category(
        &mut conn,
        &ctx,
        category_id,
        CategoryChanges {
            name,
            description,
            is_active,
        },
    )?;
    Ok(Json(to_category_response(category)))
}

pub async fn reorder_categories(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ReorderCategoriesRequest>,
) -> AppResult<Json<Vec<CategoryResponse>>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let rows = categories::reorder_categories(&mut conn, &ctx, &payload.ids)?;
    Ok(Json(rows.into_iter().map(to_category_response).collect()))
}

pub async fn delete_category(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(category_id): Path<Uuid>,
) -> AppResult<Json<DeleteCategoryResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let removal = categories::delete_category(&mut conn, &ctx, category_id)?;
    Ok(Json(DeleteCategoryResponse {
        id: category_id,
        deleted: removal == CategoryRemoval::Deleted,
        deactivated: removal == CategoryRemoval::Deactivated,
    }))
}

fn to_category_response(category: DocumentCategory) -> CategoryResponse {
    CategoryResponse {
        id: category.id,
        name: category.name,
        description: category.description,
        display_order: category.display_order,
        is_active: category.is_active,
        created_at: to_iso(category.created_at),
        updated_at: to_iso(category.updated_at),
    }
}
