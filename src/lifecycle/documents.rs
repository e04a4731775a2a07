use chrono::{NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::{select, PgConnection};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::search::{contains_pattern, sanitize_search_term};
use super::status::DocumentStatus;
use super::{organization_member, CommandContext};
use crate::activity::{ActivityAction, ActivityEvent};
use crate::auth::policy::{Action, Resource};
use crate::error::{ControlError, ControlResult};
use crate::models::{Document, DocumentRevision, NewDocument};
use crate::schema::{document_categories, document_revisions, documents};

#[derive(Debug, Clone)]
pub struct NewDocumentInput {
    pub doc_number: String,
    pub title: String,
    pub category_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub review_period_months: i32,
    pub description: Option<String>,
}

/// Free-form metadata edit. Status and the current revision pointer are not
/// part of it; only the revision engine moves those.
#[derive(Debug, Default, Clone)]
pub struct DocumentChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category_id: Option<Option<Uuid>>,
    pub owner_id: Option<Uuid>,
    pub review_period_months: Option<i32>,
    pub is_active: Option<bool>,
}

impl DocumentChanges {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category_id.is_none()
            && self.owner_id.is_none()
            && self.review_period_months.is_none()
            && self.is_active.is_none()
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = documents)]
struct DocumentChangeset<'a> {
    title: Option<&'a str>,
    description: Option<Option<&'a str>>,
    category_id: Option<Option<Uuid>>,
    owner_id: Option<Uuid>,
    review_period_months: Option<i32>,
    is_active: Option<bool>,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub category_id: Option<Uuid>,
    pub status: Option<DocumentStatus>,
    pub owner_id: Option<Uuid>,
    pub search_term: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentWithRevision {
    pub document: Document,
    pub current_revision: Option<DocumentRevision>,
}

pub fn create_document(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    input: NewDocumentInput,
) -> ControlResult<Document> {
    let organization_id = ctx.actor.organization_id;
    ctx.require(Action::CreateDocument, Resource::Organization(organization_id))?;

    let doc_number = non_empty("doc_number", &input.doc_number)?;
    let title = non_empty("title", &input.title)?;
    validate_review_period(input.review_period_months)?;
    if let Some(category_id) = input.category_id {
        ensure_active_category(conn, category_id)?;
    }
    ensure_owner_in_organization(conn, ctx, input.owner_id)?;

    let new_document = NewDocument {
        id: Uuid::new_v4(),
        doc_number,
        title,
        description: input.description,
        category_id: input.category_id,
        owner_id: input.owner_id,
        organization_id,
        status: DocumentStatus::Draft.as_str().to_string(),
        review_period_months: input.review_period_months,
    };

    match diesel::insert_into(documents::table)
        .values(&new_document)
        .execute(conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(ControlError::validation(format!(
                "document number {} is already in use",
                new_document.doc_number
            )));
        }
        Err(err) => return Err(err.into()),
    }

    let document: Document = documents::table.find(new_document.id).first(conn)?;
    info!(
        document_id = %document.id,
        doc_number = %document.doc_number,
        "controlled document created"
    );
    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::DocumentCreated,
            format!("Created document {} {}", document.doc_number, document.title),
        )
        .entity("document", document.id, document.doc_number.clone()),
    );
    Ok(document)
}

pub fn update_document(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
    changes: DocumentChanges,
) -> ControlResult<Document> {
    if changes.is_empty() {
        return Err(ControlError::validation("no changes provided"));
    }
    let existing = load_document(conn, document_id)?;
    ctx.require(Action::EditDocument, document_resource(&existing))?;

    let title = changes
        .title
        .as_deref()
        .map(|value| non_empty("title", value))
        .transpose()?;
    if let Some(months) = changes.review_period_months {
        validate_review_period(months)?;
    }
    if let Some(Some(category_id)) = changes.category_id {
        ensure_active_category(conn, category_id)?;
    }
    if let Some(owner_id) = changes.owner_id {
        ensure_owner_in_organization(conn, ctx, owner_id)?;
    }

    let changeset = DocumentChangeset {
        title: title.as_deref(),
        description: changes.description.as_ref().map(|value| value.as_deref()),
        category_id: changes.category_id,
        owner_id: changes.owner_id,
        review_period_months: changes.review_period_months,
        is_active: changes.is_active,
        updated_at: Utc::now().naive_utc(),
    };
    diesel::update(documents::table.find(document_id))
        .set(&changeset)
        .execute(conn)?;

    let document = load_document(conn, document_id)?;
    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::DocumentUpdated,
            format!("Updated document {}", document.doc_number),
        )
        .entity("document", document.id, document.doc_number.clone()),
    );
    Ok(document)
}

/// Soft removal. Revisions and the review ledger are left untouched.
pub fn withdraw_document(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
) -> ControlResult<Document> {
    let existing = load_document(conn, document_id)?;
    ctx.require(Action::WithdrawDocument, document_resource(&existing))?;

    let updated = diesel::update(
        documents::table
            .find(document_id)
            .filter(documents::status.ne(DocumentStatus::Withdrawn.as_str())),
    )
    .set((
        documents::status.eq(DocumentStatus::Withdrawn.as_str()),
        documents::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;
    if updated == 0 {
        return Err(ControlError::invalid_transition(
            "document",
            DocumentStatus::Withdrawn.as_str(),
            "draft, under_review or approved",
        ));
    }

    let document = load_document(conn, document_id)?;
    info!(document_id = %document.id, "controlled document withdrawn");
    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::DocumentWithdrawn,
            format!("Withdrew document {}", document.doc_number),
        )
        .entity("document", document.id, document.doc_number.clone())
        .details(json!({ "previous_status": existing.status })),
    );
    Ok(document)
}

pub fn list_documents(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    filter: &DocumentFilter,
) -> ControlResult<Vec<Document>> {
    let mut query = documents::table
        .filter(documents::organization_id.eq(ctx.actor.organization_id))
        .into_boxed();

    if let Some(category_id) = filter.category_id {
        query = query.filter(documents::category_id.eq(Some(category_id)));
    }
    if let Some(status) = filter.status {
        query = query.filter(documents::status.eq(status.as_str()));
    }
    if let Some(owner_id) = filter.owner_id {
        query = query.filter(documents::owner_id.eq(owner_id));
    }
    if let Some(term) = filter.search_term.as_deref().and_then(sanitize_search_term) {
        let pattern = contains_pattern(&term);
        query = query.filter(
            documents::doc_number
                .ilike(pattern.clone())
                .or(documents::title.ilike(pattern.clone()))
                .or(documents::description.ilike(pattern)),
        );
    }

    let rows = query.order(documents::doc_number.asc()).load(conn)?;
    Ok(rows)
}

pub fn get_document(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
) -> ControlResult<DocumentWithRevision> {
    let document = load_document(conn, document_id)?;
    if document.organization_id != ctx.actor.organization_id {
        return Err(ControlError::NotFound("document"));
    }
    ctx.require(Action::ViewDocument, document_resource(&document))?;

    let current_revision = match document.current_revision_id {
        Some(revision_id) => Some(
            document_revisions::table
                .find(revision_id)
                .first::<DocumentRevision>(conn)?,
        ),
        None => None,
    };

    Ok(DocumentWithRevision {
        document,
        current_revision,
    })
}

pub(crate) fn load_document(conn: &mut PgConnection, document_id: Uuid) -> ControlResult<Document> {
    documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or(ControlError::NotFound("document"))
}

/// Locks the document row for the rest of the enclosing transaction.
fn ensure_owner_in_organization(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    owner_id: Uuid,
) -> ControlResult<()> {
    if owner_id == ctx.actor_id() {
        return Ok(());
    }
    match organization_member(conn, ctx, owner_id) {
        Ok(_) => Ok(()),
        Err(ControlError::NotFound(_)) => Err(ControlError::validation(
            "document owner must belong to your organization",
        )),
        Err(err) => Err(err),
    }
}

pub(crate) fn lock_document(conn: &mut PgConnection, document_id: Uuid) -> ControlResult<Document> {
    documents::table
        .find(document_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(ControlError::NotFound("document"))
}

pub(crate) fn document_resource(document: &Document) -> Resource {
    Resource::Document {
        organization_id: document.organization_id,
        owner_id: document.owner_id,
    }
}

fn ensure_active_category(conn: &mut PgConnection, category_id: Uuid) -> ControlResult<()> {
    let found: bool = select(exists(
        document_categories::table
            .filter(document_categories::id.eq(category_id))
            .filter(document_categories::is_active.eq(true)),
    ))
    .get_result(conn)?;
    if !found {
        return Err(ControlError::validation("category does not exist"));
    }
    Ok(())
}

fn validate_review_period(months: i32) -> ControlResult<()> {
    if months <= 0 {
        return Err(ControlError::validation(
            "review_period_months must be greater than zero",
        ));
    }
    Ok(())
}

fn non_empty(field: &str, value: &str) -> ControlResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ControlError::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}
