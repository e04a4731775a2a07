//! Versioned content history of a controlled document.
//!
//! Revision numbers are assigned under a lock on the owning document row, so
//! concurrent authors always receive consecutive numbers. Approval demotes
//! the previously approved revision, repoints the document, advances its
//! review date and opens the next review cycle in one transaction.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::{count_star, max};
use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::documents::{document_resource, load_document, lock_document};
use super::status::{guard_revision, DocumentStatus, RevisionCommand, RevisionStatus, ScheduleStatus};
use super::{add_months, CommandContext};
use crate::activity::{ActivityAction, ActivityEvent};
use crate::auth::policy::Action;
use crate::error::{ControlError, ControlResult};
use crate::models::{
    Document, DocumentReviewSchedule, DocumentRevision, NewDocumentReviewSchedule,
    NewDocumentRevision,
};
use crate::schema::{document_review_schedules, document_revisions, documents};
use crate::storage::{inline_content_disposition, resolve_file_url, revision_file_path, BlobStore};

#[derive(Debug, Clone)]
pub struct RevisionUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct NewRevisionInput {
    pub file: Option<RevisionUpload>,
    pub change_summary: Option<String>,
    pub is_review_only: bool,
}

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub revision: DocumentRevision,
    pub document: Document,
    pub schedule: DocumentReviewSchedule,
    pub superseded_revision_id: Option<Uuid>,
    pub closed_cycles: usize,
}

pub async fn create_revision(
    conn: &mut PgConnection,
    storage: &dyn BlobStore,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
    input: NewRevisionInput,
) -> ControlResult<DocumentRevision> {
    let document = load_document(conn, document_id)?;
    ctx.require(Action::AuthorRevision, document_resource(&document))?;

    let NewRevisionInput {
        file,
        change_summary,
        is_review_only,
    } = input;
    if file.is_none() && !is_review_only {
        return Err(ControlError::validation(
            "a file is required unless the revision is review-only",
        ));
    }
    if file.as_ref().is_some_and(|upload| upload.bytes.is_empty()) {
        return Err(ControlError::validation("file must not be empty"));
    }

    let revision_id = Uuid::new_v4();
    let stored = match file {
        Some(upload) => {
            let path = revision_file_path(document_id, revision_id, &upload.file_name);
            let file_type = upload.content_type.clone().or_else(|| {
                mime_guess::from_path(&upload.file_name)
                    .first()
                    .map(|mime| mime.to_string())
            });
            let file_size = upload.bytes.len() as i64;
            let stored_path = storage
                .store(
                    &path,
                    upload.bytes,
                    file_type.clone(),
                    inline_content_disposition(&upload.file_name),
                )
                .await
                .map_err(|err| ControlError::Storage(err.to_string()))?;
            Some((stored_path, upload.file_name, file_size, file_type))
        }
        None => None,
    };

    let actor_id = ctx.actor_id();
    let result = conn.transaction::<_, ControlError, _>(|conn| {
        lock_document(conn, document_id)?;
        let last: Option<i32> = document_revisions::table
            .filter(document_revisions::document_id.eq(document_id))
            .select(max(document_revisions::revision_number))
            .first(conn)?;

        let (file_path, file_name, file_size, file_type) = match stored.clone() {
            Some((path, name, size, mime)) => (Some(path), Some(name), Some(size), mime),
            None => (None, None, None, None),
        };
        let new_revision = NewDocumentRevision {
            id: revision_id,
            document_id,
            revision_number: last.unwrap_or(0) + 1,
            change_summary: change_summary.clone(),
            file_path,
            file_name,
            file_size,
            file_type,
            status: RevisionStatus::Draft.as_str().to_string(),
            is_review_only,
            created_by: actor_id,
        };
        diesel::insert_into(document_revisions::table)
            .values(&new_revision)
            .execute(conn)?;
        Ok(document_revisions::table
            .find(revision_id)
            .first::<DocumentRevision>(conn)?)
    });

    let revision = match result {
        Ok(revision) => revision,
        Err(err) => {
            if let Some((path, ..)) = stored {
                if let Err(cleanup) = storage.delete(&path).await {
                    warn!(path = %path, error = %cleanup, "failed to remove orphaned revision file");
                }
            }
            return Err(err);
        }
    };

    info!(
        document_id = %document.id,
        revision_id = %revision.id,
        revision_number = revision.revision_number,
        "revision created"
    );
    ctx.record(
        ActivityEvent::new(
            Some(actor_id),
            ActivityAction::RevisionCreated,
            format!(
                "Created revision {} of {}",
                revision.revision_number, document.doc_number
            ),
        )
        .entity("document_revision", revision.id, document.doc_number.clone())
        .details(json!({
            "document_id": document.id,
            "revision_number": revision.revision_number,
            "file_name": revision.file_name,
        })),
    );
    Ok(revision)
}

pub fn submit_for_review(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    revision_id: Uuid,
) -> ControlResult<DocumentRevision> {
    let actor_id = ctx.actor_id();
    let (revision, document) = conn.transaction::<_, ControlError, _>(|conn| {
        let (document, revision) = lock_revision(conn, revision_id)?;
        ctx.require(Action::SubmitRevision, document_resource(&document))?;
        let target = guard_revision(&revision.status, RevisionCommand::Submit)?;
        ensure_not_withdrawn(&document)?;

        let now = Utc::now().naive_utc();
        transition(conn, &revision, RevisionCommand::Submit, |conn| {
            diesel::update(document_revisions::table.find(revision.id))
                .filter(document_revisions::status.eq(RevisionStatus::Draft.as_str()))
                .set((
                    document_revisions::status.eq(target.as_str()),
                    document_revisions::submitted_by.eq(Some(actor_id)),
                    document_revisions::submitted_at.eq(Some(now)),
                ))
                .execute(conn)
        })?;

        diesel::update(documents::table.find(document.id))
            .set((
                documents::status.eq(DocumentStatus::UnderReview.as_str()),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        let revision: DocumentRevision = document_revisions::table.find(revision_id).first(conn)?;
        Ok((revision, document))
    })?;

    info!(
        document_id = %document.id,
        revision_id = %revision.id,
        "revision submitted for review"
    );
    ctx.record(
        ActivityEvent::new(
            Some(actor_id),
            ActivityAction::RevisionSubmittedForReview,
            format!(
                "Submitted revision {} of {} for review",
                revision.revision_number, document.doc_number
            ),
        )
        .entity("document_revision", revision.id, document.doc_number.clone()),
    );
    Ok(revision)
}

pub fn approve_revision(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    revision_id: Uuid,
    comments: Option<String>,
) -> ControlResult<ApprovalOutcome> {
    let actor_id = ctx.actor_id();
    let today = ctx.today;
    let outcome = conn.transaction::<_, ControlError, _>(|conn| {
        let (document, revision) = lock_revision(conn, revision_id)?;
        ctx.require(Action::ReviewRevision, document_resource(&document))?;
        let target = guard_revision(&revision.status, RevisionCommand::Approve)?;
        ensure_not_withdrawn(&document)?;

        let now = Utc::now().naive_utc();
        let previously_approved: Option<Uuid> = document_revisions::table
            .filter(document_revisions::document_id.eq(document.id))
            .filter(document_revisions::status.eq(RevisionStatus::Approved.as_str()))
            .select(document_revisions::id)
            .first(conn)
            .optional()?;

        // demote first: the partial unique index admits one approved row
        if let Some(previous) = previously_approved {
            diesel::update(document_revisions::table.find(previous))
                .set(document_revisions::status.eq(RevisionStatus::Superseded.as_str()))
                .execute(conn)?;
        }

        transition(conn, &revision, RevisionCommand::Approve, |conn| {
            diesel::update(document_revisions::table.find(revision.id))
                .filter(document_revisions::status.eq(RevisionStatus::UnderReview.as_str()))
                .set((
                    document_revisions::status.eq(target.as_str()),
                    document_revisions::reviewed_by.eq(Some(actor_id)),
                    document_revisions::reviewed_at.eq(Some(now)),
                    document_revisions::review_comments.eq(comments.as_deref()),
                ))
                .execute(conn)
        })?;

        let next_review_date = add_months(today, document.review_period_months)?;
        diesel::update(documents::table.find(document.id))
            .set((
                documents::current_revision_id.eq(Some(revision.id)),
                documents::status.eq(DocumentStatus::Approved.as_str()),
                documents::next_review_date.eq(Some(next_review_date)),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        let closed_cycles = close_open_cycles(conn, document.id, actor_id, now)?;
        let schedule = open_review_cycle(conn, document.id, next_review_date)?;
        let revision: DocumentRevision = document_revisions::table.find(revision_id).first(conn)?;
        let document: Document = documents::table.find(document.id).first(conn)?;

        Ok(ApprovalOutcome {
            revision,
            document,
            schedule,
            superseded_revision_id: previously_approved,
            closed_cycles,
        })
    })?;

    info!(
        document_id = %outcome.document.id,
        revision_id = %outcome.revision.id,
        superseded = ?outcome.superseded_revision_id,
        closed_cycles = outcome.closed_cycles,
        next_review_date = %outcome.schedule.due_date,
        "revision approved"
    );
    ctx.record(
        ActivityEvent::new(
            Some(actor_id),
            ActivityAction::RevisionApproved,
            format!(
                "Approved revision {} of {}",
                outcome.revision.revision_number, outcome.document.doc_number
            ),
        )
        .entity(
            "document_revision",
            outcome.revision.id,
            outcome.document.doc_number.clone(),
        )
        .details(json!({
            "document_id": outcome.document.id,
            "superseded_revision_id": outcome.superseded_revision_id,
            "next_review_date": outcome.schedule.due_date,
            "comments": outcome.revision.review_comments,
        })),
    );
    Ok(outcome)
}

pub fn reject_revision(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    revision_id: Uuid,
    comments: &str,
) -> ControlResult<DocumentRevision> {
    let comments = comments.trim();
    if comments.is_empty() {
        return Err(ControlError::validation("a rejection reason is required"));
    }

    let actor_id = ctx.actor_id();
    let (revision, document) = conn.transaction::<_, ControlError, _>(|conn| {
        let (document, revision) = lock_revision(conn, revision_id)?;
        ctx.require(Action::ReviewRevision, document_resource(&document))?;
        let target = guard_revision(&revision.status, RevisionCommand::Reject)?;

        let now = Utc::now().naive_utc();
        transition(conn, &revision, RevisionCommand::Reject, |conn| {
            diesel::update(document_revisions::table.find(revision.id))
                .filter(document_revisions::status.eq(RevisionStatus::UnderReview.as_str()))
                .set((
                    document_revisions::status.eq(target.as_str()),
                    document_revisions::reviewed_by.eq(Some(actor_id)),
                    document_revisions::reviewed_at.eq(Some(now)),
                    document_revisions::review_comments.eq(Some(comments)),
                ))
                .execute(conn)
        })?;

        if document.status == DocumentStatus::UnderReview.as_str() {
            let still_under_review: i64 = document_revisions::table
                .filter(document_revisions::document_id.eq(document.id))
                .filter(document_revisions::status.eq(RevisionStatus::UnderReview.as_str()))
                .select(count_star())
                .first(conn)?;
            let restored = status_after_rejection(
                still_under_review > 0,
                document.current_revision_id.is_some(),
            );
            diesel::update(documents::table.find(document.id))
                .set((
                    documents::status.eq(restored.as_str()),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        let revision: DocumentRevision = document_revisions::table.find(revision_id).first(conn)?;
        Ok((revision, document))
    })?;

    info!(
        document_id = %document.id,
        revision_id = %revision.id,
        "revision rejected"
    );
    ctx.record(
        ActivityEvent::new(
            Some(actor_id),
            ActivityAction::RevisionRejected,
            format!(
                "Rejected revision {} of {}",
                revision.revision_number, document.doc_number
            ),
        )
        .entity("document_revision", revision.id, document.doc_number.clone())
        .details(json!({ "reason": comments })),
    );
    Ok(revision)
}

pub fn list_revisions(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
) -> ControlResult<Vec<DocumentRevision>> {
    let document = visible_document(conn, ctx, document_id)?;
    let revisions = document_revisions::table
        .filter(document_revisions::document_id.eq(document.id))
        .order(document_revisions::revision_number.desc())
        .load(conn)?;
    Ok(revisions)
}

pub async fn revision_file_url(
    conn: &mut PgConnection,
    storage: &dyn BlobStore,
    ctx: &CommandContext<'_>,
    revision_id: Uuid,
) -> ControlResult<String> {
    let revision: DocumentRevision = document_revisions::table
        .find(revision_id)
        .first(conn)
        .optional()?
        .ok_or(ControlError::NotFound("revision"))?;
    visible_document(conn, ctx, revision.document_id)?;
    let path = revision
        .file_path
        .ok_or(ControlError::NotFound("revision file"))?;
    resolve_file_url(storage, &path)
        .await
        .map_err(|err| ControlError::Storage(err.to_string()))
}

/// Document status once a review ends in rejection.
pub fn status_after_rejection(others_under_review: bool, has_current: bool) -> DocumentStatus {
    if others_under_review {
        DocumentStatus::UnderReview
    } else if has_current {
        DocumentStatus::Approved
    } else {
        DocumentStatus::Draft
    }
}

/// Completes every open cycle of a document. A new approval satisfies the
/// outstanding review obligation, so these rows carry `no_changes_needed = false`.
pub(crate) fn close_open_cycles(
    conn: &mut PgConnection,
    document_id: Uuid,
    actor_id: Uuid,
    now: NaiveDateTime,
) -> ControlResult<usize> {
    Ok(diesel::update(
        document_review_schedules::table
            .filter(document_review_schedules::document_id.eq(document_id))
            .filter(document_review_schedules::status.eq_any(ScheduleStatus::OPEN)),
    )
    .set((
        document_review_schedules::status.eq(ScheduleStatus::Completed.as_str()),
        document_review_schedules::completed_by.eq(Some(actor_id)),
        document_review_schedules::completed_at.eq(Some(now)),
        document_review_schedules::no_changes_needed.eq(false),
    ))
    .execute(conn)?)
}

pub(crate) fn open_review_cycle(
    conn: &mut PgConnection,
    document_id: Uuid,
    due_date: NaiveDate,
) -> ControlResult<DocumentReviewSchedule> {
    let row = NewDocumentReviewSchedule {
        id: Uuid::new_v4(),
        document_id,
        due_date,
        status: ScheduleStatus::Pending.as_str().to_string(),
    };
    diesel::insert_into(document_review_schedules::table)
        .values(&row)
        .execute(conn)?;
    Ok(document_review_schedules::table.find(row.id).first(conn)?)
}

fn visible_document(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
) -> ControlResult<Document> {
    let document = load_document(conn, document_id)?;
    if document.organization_id != ctx.actor.organization_id {
        return Err(ControlError::NotFound("document"));
    }
    ctx.require(Action::ViewDocument, document_resource(&document))?;
    Ok(document)
}

/// Locks the owning document, then the revision, always in that order.
fn lock_revision(
    conn: &mut PgConnection,
    revision_id: Uuid,
) -> ControlResult<(Document, DocumentRevision)> {
    let document_id: Uuid = document_revisions::table
        .find(revision_id)
        .select(document_revisions::document_id)
        .first(conn)
        .optional()?
        .ok_or(ControlError::NotFound("revision"))?;
    let document = lock_document(conn, document_id)?;
    let revision: DocumentRevision = document_revisions::table
        .find(revision_id)
        .for_update()
        .first(conn)?;
    Ok((document, revision))
}

/// Runs a conditional update; zero affected rows means another request moved
/// the revision first.
fn transition<F>(
    conn: &mut PgConnection,
    revision: &DocumentRevision,
    command: RevisionCommand,
    update: F,
) -> ControlResult<()>
where
    F: FnOnce(&mut PgConnection) -> QueryResult<usize>,
{
    if update(conn)? == 0 {
        let current: String = document_revisions::table
            .find(revision.id)
            .select(document_revisions::status)
            .first(conn)?;
        return Err(ControlError::invalid_transition(
            "revision",
            current,
            RevisionStatus::required_for(command).as_str(),
        ));
    }
    Ok(())
}

fn ensure_not_withdrawn(document: &Document) -> ControlResult<()> {
    if document.status == DocumentStatus::Withdrawn.as_str() {
        return Err(ControlError::invalid_transition(
            "document",
            DocumentStatus::Withdrawn.as_str(),
            "draft, under_review or approved",
        ));
    }
    Ok(())
}
