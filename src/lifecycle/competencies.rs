use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::status::CompetencyStatus;
use super::{organization_member, CommandContext};
use crate::activity::{ActivityAction, ActivityEvent, ActivityLogger};
use crate::auth::policy::{Action, Decision, Resource};
use crate::error::{ControlError, ControlResult};
use crate::models::{
    CompetencyHistoryEntry, EmployeeCompetency, NewCompetencyHistoryEntry, NewEmployeeCompetency,
};
use crate::schema::{competency_history, employee_competencies, users};
use crate::storage::{resolve_file_url, BlobStore};

#[derive(Debug, Default, Clone)]
pub struct CompetencySubmission {
    pub user_id: Uuid,
    pub competency_id: Uuid,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub document_name: Option<String>,
    pub status: Option<CompetencyStatus>,
    pub witness_checked: bool,
    pub witnessed_by: Option<Uuid>,
    pub witness_notes: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompetencyView {
    pub competency: EmployeeCompetency,
    pub effective_status: CompetencyStatus,
}

#[derive(Debug, Default, Clone)]
pub struct CompetencyFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<CompetencyStatus>,
}

/// Status a submission lands in when the caller does not pick one: attached
/// evidence needs review, self-attested values do not.
pub fn default_status(has_document: bool) -> CompetencyStatus {
    if has_document {
        CompetencyStatus::PendingApproval
    } else {
        CompetencyStatus::Active
    }
}

/// The single place `expired` is derived. Stored `expired` rows stay expired;
/// active rows whose expiry date has passed read as expired.
pub fn effective_status(
    stored: CompetencyStatus,
    expiry_date: Option<NaiveDate>,
    today: NaiveDate,
) -> CompetencyStatus {
    match (stored, expiry_date) {
        (CompetencyStatus::Active, Some(expiry)) if expiry < today => CompetencyStatus::Expired,
        (status, _) => status,
    }
}

pub fn upsert_competency(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    submission: CompetencySubmission,
) -> ControlResult<EmployeeCompetency> {
    organization_member(conn, ctx, submission.user_id)?;
    ctx.require(
        Action::SubmitCompetency,
        Resource::Competency {
            owner_id: submission.user_id,
        },
    )?;
    let has_document = submission
        .document_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    let (status, verifier) = match submission.status {
        // Choosing a status other than the review queue is a verification.
        Some(status) if status != CompetencyStatus::PendingApproval => {
            ctx.require(Action::VerifyCompetency, Resource::Global)?;
            (status, Some(ctx.actor_id()))
        }
        Some(status) => (status, None),
        None => (default_status(has_document), None),
    };
    let actor_id = ctx.actor_id();

    let (competency, created) = conn.transaction::<_, ControlError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let witnessed_at = submission.witness_checked.then_some(now);
        let verified_by = verifier;
        let verified_at = verifier.map(|_| now);

        // The insert claims the (user, competency) pair; a concurrent first
        // submission waits on it and then takes the update path below.
        let candidate = NewEmployeeCompetency {
            id: Uuid::new_v4(),
            user_id: submission.user_id,
            competency_id: submission.competency_id,
            value: submission.value.clone(),
            expiry_date: submission.expiry_date,
            document_url: submission.document_url.clone(),
            document_name: submission.document_name.clone(),
            status: status.as_str().to_string(),
            witness_checked: submission.witness_checked,
            witnessed_by: submission.witnessed_by,
            witnessed_at,
            witness_notes: submission.witness_notes.clone(),
            notes: submission.notes.clone(),
        };
        let created = diesel::insert_into(employee_competencies::table)
            .values(&candidate)
            .on_conflict((
                employee_competencies::user_id,
                employee_competencies::competency_id,
            ))
            .do_nothing()
            .execute(conn)?
            == 1;

        let row: EmployeeCompetency = employee_competencies::table
            .filter(employee_competencies::user_id.eq(submission.user_id))
            .filter(employee_competencies::competency_id.eq(submission.competency_id))
            .for_update()
            .first(conn)?;

        if created {
            if verified_by.is_some() {
                diesel::update(employee_competencies::table.find(row.id))
                    .set((
                        employee_competencies::verified_by.eq(verified_by),
                        employee_competencies::verified_at.eq(verified_at),
                    ))
                    .execute(conn)?;
            }
        } else {
            diesel::update(employee_competencies::table.find(row.id))
                .set((
                    employee_competencies::value.eq(submission.value.as_deref()),
                    employee_competencies::expiry_date.eq(submission.expiry_date),
                    employee_competencies::document_url.eq(submission.document_url.as_deref()),
                    employee_competencies::document_name.eq(submission.document_name.as_deref()),
                    employee_competencies::status.eq(status.as_str()),
                    employee_competencies::witness_checked.eq(submission.witness_checked),
                    employee_competencies::witnessed_by.eq(submission.witnessed_by),
                    employee_competencies::witnessed_at.eq(witnessed_at),
                    employee_competencies::witness_notes.eq(submission.witness_notes.as_deref()),
                    employee_competencies::verified_by.eq(verified_by),
                    employee_competencies::verified_at.eq(verified_at),
                    employee_competencies::notes.eq(submission.notes.as_deref()),
                    employee_competencies::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        let competency: EmployeeCompetency =
            employee_competencies::table.find(row.id).first(conn)?;
        let action = if created { "created" } else { "updated" };
        append_history(conn, &competency, action, Some(actor_id))?;
        Ok((competency, created))
    })?;

    info!(
        competency_id = %competency.id,
        status = %competency.status,
        created,
        "competency submitted"
    );
    ctx.record(
        ActivityEvent::new(
            Some(actor_id),
            if created {
                ActivityAction::CompetencyCreated
            } else {
                ActivityAction::CompetencyUpdated
            },
            format!("Submitted competency with status {}", competency.status),
        )
        .entity("employee_competency", competency.id, competency.competency_id.to_string())
        .details(json!({
            "user_id": competency.user_id,
            "competency_id": competency.competency_id,
            "status": competency.status,
        })),
    );
    Ok(competency)
}

/// Approves or rejects a submission waiting in `pending_approval`.
pub fn verify_competency(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    competency_id: Uuid,
    approved: bool,
    reason: Option<String>,
) -> ControlResult<EmployeeCompetency> {
    let target = if approved {
        CompetencyStatus::Active
    } else {
        CompetencyStatus::Rejected
    };
    let notes = if approved { None } else { reason.clone() };
    let competency = review_pending(conn, ctx, competency_id, target, notes, "verified")?;

    info!(competency_id = %competency.id, approved, "competency verified");
    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            if approved {
                ActivityAction::CompetencyApproved
            } else {
                ActivityAction::CompetencyRejected
            },
            if approved {
                "Approved competency submission".to_string()
            } else {
                "Rejected competency submission".to_string()
            },
        )
        .entity("employee_competency", competency.id, competency.competency_id.to_string())
        .details(json!({ "user_id": competency.user_id, "reason": reason })),
    );
    Ok(competency)
}

/// Sends a pending submission back to its owner. The owner resubmits through
/// [`upsert_competency`].
pub fn request_changes(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    competency_id: Uuid,
    comment: &str,
) -> ControlResult<EmployeeCompetency> {
    let comment = comment.trim();
    if comment.is_empty() {
        return Err(ControlError::validation("a comment is required when requesting changes"));
    }
    let competency = review_pending(
        conn,
        ctx,
        competency_id,
        CompetencyStatus::ChangesRequested,
        Some(comment.to_string()),
        "changes_requested",
    )?;

    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::CompetencyChangesRequested,
            "Requested changes to competency submission",
        )
        .entity("employee_competency", competency.id, competency.competency_id.to_string())
        .details(json!({ "user_id": competency.user_id, "comment": comment })),
    );
    Ok(competency)
}

pub fn list_competencies(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    filter: &CompetencyFilter,
) -> ControlResult<Vec<CompetencyView>> {
    let reviewer = ctx
        .policy
        .authorize(ctx.actor, Action::VerifyCompetency, Resource::Global)
        == Decision::Allow;
    let user_id = match filter.user_id {
        Some(user_id) => {
            ctx.require(Action::ViewCompetency, Resource::Competency { owner_id: user_id })?;
            Some(user_id)
        }
        None if reviewer => None,
        None => Some(ctx.actor_id()),
    };

    let mut query = employee_competencies::table
        .inner_join(users::table)
        .filter(users::organization_id.eq(ctx.actor.organization_id))
        .select(employee_competencies::all_columns)
        .into_boxed();
    if let Some(user_id) = user_id {
        query = query.filter(employee_competencies::user_id.eq(user_id));
    }
    let rows: Vec<EmployeeCompetency> = query
        .order((
            employee_competencies::user_id.asc(),
            employee_competencies::expiry_date.asc(),
        ))
        .load(conn)?;

    let mut views = Vec::with_capacity(rows.len());
    for competency in rows {
        let stored: CompetencyStatus = competency.status.parse()?;
        let effective = effective_status(stored, competency.expiry_date, ctx.today);
        if filter.status.is_some_and(|wanted| wanted != effective) {
            continue;
        }
        views.push(CompetencyView {
            competency,
            effective_status: effective,
        });
    }
    Ok(views)
}

pub fn competency_history(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    competency_id: Uuid,
) -> ControlResult<Vec<CompetencyHistoryEntry>> {
    let competency = visible_competency(conn, ctx, competency_id)?;
    let rows = competency_history::table
        .filter(competency_history::employee_competency_id.eq(competency.id))
        .order(competency_history::created_at.desc())
        .load(conn)?;
    Ok(rows)
}

pub async fn competency_document_url(
    conn: &mut PgConnection,
    storage: &dyn BlobStore,
    ctx: &CommandContext<'_>,
    competency_id: Uuid,
) -> ControlResult<String> {
    let competency = visible_competency(conn, ctx, competency_id)?;
    let path = competency
        .document_url
        .filter(|url| !url.is_empty())
        .ok_or(ControlError::NotFound("competency document"))?;
    resolve_file_url(storage, &path)
        .await
        .map_err(|err| ControlError::Storage(err.to_string()))
}

/// Stores `expired` on every active competency whose expiry date has passed.
/// This is the only writer of that status.
pub fn sync_expired(
    conn: &mut PgConnection,
    activity: &ActivityLogger,
    today: NaiveDate,
) -> ControlResult<usize> {
    let expired = conn.transaction::<_, ControlError, _>(|conn| {
        let rows: Vec<EmployeeCompetency> = diesel::update(
            employee_competencies::table
                .filter(employee_competencies::status.eq(CompetencyStatus::Active.as_str()))
                .filter(employee_competencies::expiry_date.lt(today)),
        )
        .set((
            employee_competencies::status.eq(CompetencyStatus::Expired.as_str()),
            employee_competencies::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_results(conn)?;
        for row in &rows {
            append_history(conn, row, "expired", None)?;
        }
        Ok(rows)
    })?;

    for row in &expired {
        activity.record(
            ActivityEvent::new(
                None,
                ActivityAction::CompetencyExpired,
                format!("Competency expired on {}", row.expiry_date.unwrap_or(today)),
            )
            .entity("employee_competency", row.id, row.competency_id.to_string())
            .details(json!({ "user_id": row.user_id })),
        );
    }
    info!(count = expired.len(), %today, "expired competencies synchronized");
    Ok(expired.len())
}

fn review_pending(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    competency_id: Uuid,
    target: CompetencyStatus,
    notes: Option<String>,
    history_action: &str,
) -> ControlResult<EmployeeCompetency> {
    let actor_id = ctx.actor_id();
    conn.transaction::<_, ControlError, _>(|conn| {
        let existing: EmployeeCompetency = employee_competencies::table
            .find(competency_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(ControlError::NotFound("competency"))?;
        organization_member(conn, ctx, existing.user_id)?;
        ctx.require(Action::VerifyCompetency, Resource::Global)?;

        let now = Utc::now().naive_utc();
        let updated = diesel::update(
            employee_competencies::table
                .find(competency_id)
                .filter(
                    employee_competencies::status.eq(CompetencyStatus::PendingApproval.as_str()),
                ),
        )
        .set((
            employee_competencies::status.eq(target.as_str()),
            employee_competencies::verified_by.eq(Some(actor_id)),
            employee_competencies::verified_at.eq(Some(now)),
            employee_competencies::notes.eq(notes.as_deref().or(existing.notes.as_deref())),
            employee_competencies::updated_at.eq(now),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Err(ControlError::invalid_transition(
                "competency",
                existing.status,
                CompetencyStatus::PendingApproval.as_str(),
            ));
        }

        let competency: EmployeeCompetency =
            employee_competencies::table.find(competency_id).first(conn)?;
        append_history(conn, &competency, history_action, Some(actor_id))?;
        Ok(competency)
    })
}

fn append_history(
    conn: &mut PgConnection,
    competency: &EmployeeCompetency,
    action: &str,
    changed_by: Option<Uuid>,
) -> ControlResult<()> {
    let entry = NewCompetencyHistoryEntry {
        id: Uuid::new_v4(),
        employee_competency_id: competency.id,
        user_id: competency.user_id,
        competency_id: competency.competency_id,
        action: action.to_string(),
        status: competency.status.clone(),
        value: competency.value.clone(),
        expiry_date: competency.expiry_date,
        document_url: competency.document_url.clone(),
        notes: competency.notes.clone(),
        changed_by,
    };
    diesel::insert_into(competency_history::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

fn visible_competency(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    competency_id: Uuid,
) -> ControlResult<EmployeeCompetency> {
    let competency: EmployeeCompetency = employee_competencies::table
        .find(competency_id)
        .first(conn)
        .optional()?
        .ok_or(ControlError::NotFound("competency"))?;
    organization_member(conn, ctx, competency.user_id)?;
    ctx.require(
        Action::ViewCompetency,
        Resource::Competency {
            owner_id: competency.user_id,
        },
    )?;
    Ok(competency)
}
