use chrono::{Days, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::documents::{document_resource, load_document, lock_document};
use super::revisions::open_review_cycle;
use super::status::{DocumentStatus, ScheduleStatus};
use super::{add_months, CommandContext};
use crate::activity::{ActivityAction, ActivityEvent, ActivityLogger};
use crate::auth::policy::Action;
use crate::error::{ControlError, ControlResult};
use crate::models::{Document, DocumentReviewSchedule, User};
use crate::notifier::{escape_html, EmailMessage, Notifier};
use crate::schema::{document_review_schedules, documents, users};

/// Open review cycles due within this many days are reported as `due`.
pub const DUE_SOON_DAYS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewUrgency {
    Due,
    Overdue,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewDueDocument {
    pub document_id: Uuid,
    pub doc_number: String,
    pub title: String,
    pub owner_id: Uuid,
    pub organization_id: Uuid,
    pub next_review_date: NaiveDate,
    pub days_until_review: i64,
    pub urgency: ReviewUrgency,
}

#[derive(Debug, Clone)]
pub struct ReviewCompletion {
    pub document: Document,
    pub completed_schedule_id: Option<Uuid>,
    pub next_schedule: DocumentReviewSchedule,
}

pub fn classify_review(next_review_date: NaiveDate, today: NaiveDate) -> ReviewUrgency {
    if next_review_date < today {
        ReviewUrgency::Overdue
    } else {
        ReviewUrgency::Due
    }
}

/// Status of a ledger row as of `today`; only `completed` is ever stored
/// after creation.
pub fn schedule_status_on(schedule: &DocumentReviewSchedule, today: NaiveDate) -> ScheduleStatus {
    if schedule.status == ScheduleStatus::Completed.as_str() {
        return ScheduleStatus::Completed;
    }
    if schedule.due_date < today {
        ScheduleStatus::Overdue
    } else if today
        .checked_add_days(Days::new(DUE_SOON_DAYS))
        .is_some_and(|horizon| schedule.due_date <= horizon)
    {
        ScheduleStatus::Due
    } else {
        ScheduleStatus::Pending
    }
}

/// Pure read: documents whose review date lies on or before
/// `today + days_ahead`, overdue ones first.
pub fn documents_due_for_review(
    conn: &mut PgConnection,
    organization_id: Option<Uuid>,
    days_ahead: u32,
    today: NaiveDate,
) -> ControlResult<Vec<ReviewDueDocument>> {
    let horizon = today
        .checked_add_days(Days::new(u64::from(days_ahead)))
        .ok_or_else(|| ControlError::validation("days_ahead out of range"))?;

    let mut query = documents::table
        .filter(documents::is_active.eq(true))
        .filter(documents::status.ne(DocumentStatus::Withdrawn.as_str()))
        .filter(documents::next_review_date.le(horizon))
        .into_boxed();
    if let Some(organization_id) = organization_id {
        query = query.filter(documents::organization_id.eq(organization_id));
    }

    let rows: Vec<Document> = query
        .order((documents::next_review_date.asc(), documents::doc_number.asc()))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .filter_map(|document| {
            let next_review_date = document.next_review_date?;
            Some(ReviewDueDocument {
                document_id: document.id,
                doc_number: document.doc_number,
                title: document.title,
                owner_id: document.owner_id,
                organization_id: document.organization_id,
                next_review_date,
                days_until_review: (next_review_date - today).num_days(),
                urgency: classify_review(next_review_date, today),
            })
        })
        .collect())
}

pub fn list_schedules(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
) -> ControlResult<Vec<(DocumentReviewSchedule, ScheduleStatus)>> {
    let document = load_document(conn, document_id)?;
    if document.organization_id != ctx.actor.organization_id {
        return Err(ControlError::NotFound("document"));
    }
    ctx.require(Action::ViewDocument, document_resource(&document))?;

    let rows: Vec<DocumentReviewSchedule> = document_review_schedules::table
        .filter(document_review_schedules::document_id.eq(document_id))
        .order((
            document_review_schedules::due_date.desc(),
            document_review_schedules::created_at.desc(),
        ))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let status = schedule_status_on(&row, ctx.today);
            (row, status)
        })
        .collect())
}

/// Renews the review clock without a new revision. When no open cycle
/// exists the clock still advances and a fresh cycle is opened.
pub fn complete_review_no_changes(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    document_id: Uuid,
    notes: Option<String>,
) -> ControlResult<ReviewCompletion> {
    let actor_id = ctx.actor_id();
    let today = ctx.today;

    let completion = conn.transaction::<_, ControlError, _>(|conn| {
        let document = lock_document(conn, document_id)?;
        ctx.require(Action::CompleteReview, document_resource(&document))?;
        if document.status == DocumentStatus::Withdrawn.as_str() {
            return Err(ControlError::invalid_transition(
                "document",
                DocumentStatus::Withdrawn.as_str(),
                "draft, under_review or approved",
            ));
        }

        let open: Option<DocumentReviewSchedule> = document_review_schedules::table
            .filter(document_review_schedules::document_id.eq(document_id))
            .filter(document_review_schedules::status.eq_any(ScheduleStatus::OPEN))
            .order((
                document_review_schedules::due_date.desc(),
                document_review_schedules::created_at.desc(),
            ))
            .for_update()
            .first(conn)
            .optional()?;

        let now = Utc::now().naive_utc();
        let completed_schedule_id = match open {
            Some(schedule) => {
                diesel::update(document_review_schedules::table.find(schedule.id))
                    .set((
                        document_review_schedules::status
                            .eq(ScheduleStatus::Completed.as_str()),
                        document_review_schedules::completed_by.eq(Some(actor_id)),
                        document_review_schedules::completed_at.eq(Some(now)),
                        document_review_schedules::no_changes_needed.eq(true),
                        document_review_schedules::review_notes.eq(notes.as_deref()),
                    ))
                    .execute(conn)?;
                Some(schedule.id)
            }
            None => None,
        };

        let next_review_date = add_months(today, document.review_period_months)?;
        diesel::update(documents::table.find(document_id))
            .set((
                documents::next_review_date.eq(Some(next_review_date)),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;
        let next_schedule = open_review_cycle(conn, document_id, next_review_date)?;
        let document: Document = documents::table.find(document_id).first(conn)?;

        Ok(ReviewCompletion {
            document,
            completed_schedule_id,
            next_schedule,
        })
    })?;

    if completion.completed_schedule_id.is_none() {
        warn!(
            document_id = %completion.document.id,
            "no open review cycle found; review clock advanced anyway"
        );
    }
    info!(
        document_id = %completion.document.id,
        next_review_date = %completion.next_schedule.due_date,
        "no-change review completed"
    );
    ctx.record(
        ActivityEvent::new(
            Some(actor_id),
            ActivityAction::DocumentReviewCompleted,
            format!(
                "Completed review of {} with no changes",
                completion.document.doc_number
            ),
        )
        .entity(
            "document",
            completion.document.id,
            completion.document.doc_number.clone(),
        )
        .details(json!({
            "completed_schedule_id": completion.completed_schedule_id,
            "next_review_date": completion.next_schedule.due_date,
            "notes": notes,
        })),
    );
    Ok(completion)
}

/// Emails each owner the documents they must review. Returns the number of
/// emails accepted by the notifier; individual failures are logged.
pub async fn send_review_reminders(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    activity: &ActivityLogger,
    days_ahead: u32,
    today: NaiveDate,
    app_base_url: &str,
) -> ControlResult<usize> {
    let due = documents_due_for_review(conn, None, days_ahead, today)?;
    if due.is_empty() {
        return Ok(0);
    }

    let mut owner_ids: Vec<Uuid> = due.iter().map(|doc| doc.owner_id).collect();
    owner_ids.sort();
    owner_ids.dedup();
    let owners: Vec<User> = users::table
        .filter(users::id.eq_any(&owner_ids))
        .load(conn)?;

    let mut sent = 0;
    for owner in owners {
        let items: Vec<&ReviewDueDocument> =
            due.iter().filter(|doc| doc.owner_id == owner.id).collect();
        let message = review_reminder_email(&owner, &items, app_base_url);
        match notifier.send_email(message).await {
            Ok(receipt) => {
                sent += 1;
                activity.record(
                    ActivityEvent::new(
                        None,
                        ActivityAction::ReviewReminderSent,
                        format!("Sent review reminder to {}", owner.email),
                    )
                    .details(json!({
                        "message_id": receipt.id,
                        "documents": items.iter().map(|doc| doc.document_id).collect::<Vec<_>>(),
                    })),
                );
            }
            Err(err) => {
                warn!(owner_id = %owner.id, error = %err, "failed to send review reminder");
            }
        }
    }
    Ok(sent)
}

fn review_reminder_email(
    owner: &User,
    items: &[&ReviewDueDocument],
    app_base_url: &str,
) -> EmailMessage {
    let mut rows = String::new();
    for item in items {
        let label = match item.urgency {
            ReviewUrgency::Overdue => format!("overdue by {} days", -item.days_until_review),
            ReviewUrgency::Due => format!("due in {} days", item.days_until_review),
        };
        rows.push_str(&format!(
            "<li><strong>{}</strong> {} ({}, {})</li>",
            escape_html(&item.doc_number),
            escape_html(&item.title),
            item.next_review_date,
            label
        ));
    }
    let greeting = owner.full_name.as_deref().unwrap_or(owner.email.as_str());
    EmailMessage {
        to: vec![owner.email.clone()],
        subject: format!("{} controlled document(s) require review", items.len()),
        html: format!(
            "<p>Hello {},</p><p>The following documents are due for periodic review:</p><ul>{}</ul><p><a href=\"{}/documents\">Open document control</a></p>",
            escape_html(greeting),
            rows,
            app_base_url.trim_end_matches('/')
        ),
    }
}
