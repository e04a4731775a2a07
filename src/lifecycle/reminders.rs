use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, Days, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::status::CompetencyStatus;
use super::CommandContext;
use crate::activity::{ActivityAction, ActivityEvent, ActivityLogger};
use crate::auth::policy::{Action, Resource};
use crate::error::{ControlError, ControlResult};
use crate::models::{EmailReminderSettings, EmployeeCompetency, NewEmailReminderLog, User};
use crate::notifier::{escape_html, EmailMessage, Notifier};
use crate::schema::{email_reminder_logs, email_reminder_settings, employee_competencies, users};

const SETTINGS_ID: i32 = 1;
/// A threshold of `t` months covers the last `t * DAYS_PER_MONTH` days before
/// expiry.
pub const DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, Default, Clone)]
pub struct ReminderSettingsUpdate {
    pub is_enabled: Option<bool>,
    pub thresholds_months: Option<Vec<i32>>,
    pub manager_emails: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub employee_competency_id: Uuid,
    pub user_id: Uuid,
    pub competency_id: Uuid,
    pub label: String,
    pub expiry_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct PlannedReminder {
    pub user_id: Uuid,
    pub threshold_months: i32,
    pub items: Vec<ReminderCandidate>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReminderRunSummary {
    pub enabled: bool,
    pub candidates: usize,
    pub emails_sent: usize,
    pub reminders_logged: usize,
    pub failures: usize,
}

pub fn get_reminder_settings(conn: &mut PgConnection) -> ControlResult<EmailReminderSettings> {
    email_reminder_settings::table
        .find(SETTINGS_ID)
        .first(conn)
        .optional()?
        .ok_or(ControlError::NotFound("reminder settings"))
}

pub fn update_reminder_settings(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    update: ReminderSettingsUpdate,
) -> ControlResult<EmailReminderSettings> {
    ctx.require(Action::ManageReminders, Resource::Global)?;
    let current = get_reminder_settings(conn)?;

    let thresholds = match update.thresholds_months {
        Some(values) => normalize_thresholds(values)?,
        None => current.thresholds_months,
    };
    let managers = match update.manager_emails {
        Some(values) => normalize_emails(values)?,
        None => current.manager_emails,
    };
    let is_enabled = update.is_enabled.unwrap_or(current.is_enabled);

    diesel::update(email_reminder_settings::table.find(SETTINGS_ID))
        .set((
            email_reminder_settings::is_enabled.eq(is_enabled),
            email_reminder_settings::thresholds_months.eq(&thresholds),
            email_reminder_settings::manager_emails.eq(&managers),
            email_reminder_settings::updated_by.eq(Some(ctx.actor_id())),
            email_reminder_settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    let settings = get_reminder_settings(conn)?;
    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::ReminderSettingsUpdated,
            "Updated expiry reminder settings",
        )
        .details(json!({
            "is_enabled": settings.is_enabled,
            "thresholds_months": settings.thresholds_months,
            "manager_emails": settings.manager_emails.len(),
        })),
    );
    Ok(settings)
}

/// Smallest threshold whose window contains `days_until_expiry`.
/// `thresholds` must be sorted ascending.
pub fn threshold_for(days_until_expiry: i64, thresholds: &[i32]) -> Option<i32> {
    if days_until_expiry < 0 {
        return None;
    }
    thresholds
        .iter()
        .copied()
        .find(|months| days_until_expiry <= i64::from(*months) * DAYS_PER_MONTH)
}

/// Groups the competencies due a reminder by (user, threshold). Pairs listed
/// in `already_sent` as `(employee_competency_id, threshold)` are skipped.
pub fn plan_reminders(
    candidates: &[ReminderCandidate],
    thresholds: &[i32],
    already_sent: &HashSet<(Uuid, i32)>,
    today: NaiveDate,
) -> Vec<PlannedReminder> {
    let mut sorted = thresholds.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut groups: BTreeMap<(Uuid, i32), Vec<ReminderCandidate>> = BTreeMap::new();
    for candidate in candidates {
        let days = (candidate.expiry_date - today).num_days();
        let Some(threshold) = threshold_for(days, &sorted) else {
            continue;
        };
        if already_sent.contains(&(candidate.employee_competency_id, threshold)) {
            continue;
        }
        groups
            .entry((candidate.user_id, threshold))
            .or_default()
            .push(candidate.clone());
    }

    groups
        .into_iter()
        .map(|((user_id, threshold_months), items)| PlannedReminder {
            user_id,
            threshold_months,
            items,
        })
        .collect()
}

/// Sends the reminders due today. Each competency gets at most one email
/// per threshold per calendar year; failed sends are not logged and are
/// retried on the next run.
pub async fn trigger_expiration_reminders(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    activity: &ActivityLogger,
    today: NaiveDate,
    app_base_url: &str,
) -> ControlResult<ReminderRunSummary> {
    let settings = get_reminder_settings(conn)?;
    if !settings.is_enabled || settings.thresholds_months.is_empty() {
        info!("expiry reminders disabled; nothing sent");
        return Ok(ReminderRunSummary::default());
    }

    let (candidates, recipients) =
        load_candidates(conn, None, &settings.thresholds_months, today)?;
    let year = today.year();
    let ids: Vec<Uuid> = candidates
        .iter()
        .map(|candidate| candidate.employee_competency_id)
        .collect();
    let already_sent: HashSet<(Uuid, i32)> = email_reminder_logs::table
        .filter(email_reminder_logs::reminder_year.eq(year))
        .filter(email_reminder_logs::employee_competency_id.eq_any(&ids))
        .select((
            email_reminder_logs::employee_competency_id,
            email_reminder_logs::threshold_months,
        ))
        .load::<(Uuid, i32)>(conn)?
        .into_iter()
        .collect();

    let plan = plan_reminders(&candidates, &settings.thresholds_months, &already_sent, today);
    let mut summary = deliver(
        conn,
        notifier,
        activity,
        &plan,
        &recipients,
        &settings.manager_emails,
        today,
        app_base_url,
    )
    .await;
    summary.candidates = candidates.len();
    info!(
        sent = summary.emails_sent,
        logged = summary.reminders_logged,
        failures = summary.failures,
        "expiry reminder run finished"
    );
    Ok(summary)
}

/// Manual resend for one employee. Ignores the dedup log but still writes to
/// it.
pub async fn send_expiry_reminder_to_user(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    ctx: &CommandContext<'_>,
    user_id: Uuid,
    app_base_url: &str,
) -> ControlResult<ReminderRunSummary> {
    ctx.require(Action::ManageReminders, Resource::Global)?;
    let member: Option<Uuid> = users::table
        .find(user_id)
        .filter(users::organization_id.eq(ctx.actor.organization_id))
        .select(users::id)
        .first(conn)
        .optional()?;
    if member.is_none() {
        return Err(ControlError::NotFound("user"));
    }

    let settings = get_reminder_settings(conn)?;
    if settings.thresholds_months.is_empty() {
        return Err(ControlError::validation("no reminder thresholds configured"));
    }
    let (candidates, recipients) =
        load_candidates(conn, Some(user_id), &settings.thresholds_months, ctx.today)?;
    let plan = plan_reminders(
        &candidates,
        &settings.thresholds_months,
        &HashSet::new(),
        ctx.today,
    );
    let mut summary = deliver(
        conn,
        notifier,
        ctx.activity,
        &plan,
        &recipients,
        &settings.manager_emails,
        ctx.today,
        app_base_url,
    )
    .await;
    summary.candidates = candidates.len();
    if summary.failures > 0 && summary.emails_sent == 0 {
        return Err(ControlError::Notification(format!(
            "failed to send {} reminder email(s)",
            summary.failures
        )));
    }
    Ok(summary)
}

type Recipients = BTreeMap<Uuid, User>;

fn load_candidates(
    conn: &mut PgConnection,
    user_id: Option<Uuid>,
    thresholds: &[i32],
    today: NaiveDate,
) -> ControlResult<(Vec<ReminderCandidate>, Recipients)> {
    let widest = thresholds.iter().copied().max().unwrap_or(0);
    let window = u64::try_from(i64::from(widest) * DAYS_PER_MONTH).unwrap_or(0);
    let horizon = today
        .checked_add_days(Days::new(window))
        .ok_or_else(|| ControlError::validation("reminder window out of range"))?;

    let mut query = employee_competencies::table
        .inner_join(users::table)
        .filter(employee_competencies::status.eq(CompetencyStatus::Active.as_str()))
        .filter(employee_competencies::expiry_date.ge(today))
        .filter(employee_competencies::expiry_date.le(horizon))
        .select((employee_competencies::all_columns, users::all_columns))
        .into_boxed();
    if let Some(user_id) = user_id {
        query = query.filter(employee_competencies::user_id.eq(user_id));
    }
    let rows: Vec<(EmployeeCompetency, User)> = query
        .order(employee_competencies::expiry_date.asc())
        .load(conn)?;

    let mut recipients = Recipients::new();
    let mut candidates = Vec::with_capacity(rows.len());
    for (competency, user) in rows {
        let Some(expiry_date) = competency.expiry_date else {
            continue;
        };
        candidates.push(ReminderCandidate {
            employee_competency_id: competency.id,
            user_id: competency.user_id,
            competency_id: competency.competency_id,
            label: competency
                .document_name
                .or(competency.value)
                .unwrap_or_else(|| competency.competency_id.to_string()),
            expiry_date,
        });
        recipients.entry(user.id).or_insert(user);
    }
    Ok((candidates, recipients))
}

#[allow(clippy::too_many_arguments)]
async fn deliver(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    activity: &ActivityLogger,
    plan: &[PlannedReminder],
    recipients: &Recipients,
    manager_emails: &[String],
    today: NaiveDate,
    app_base_url: &str,
) -> ReminderRunSummary {
    let mut summary = ReminderRunSummary {
        enabled: true,
        ..ReminderRunSummary::default()
    };

    for reminder in plan {
        let Some(user) = recipients.get(&reminder.user_id) else {
            continue;
        };
        let message = expiry_email(user, reminder, manager_emails, today, app_base_url);
        let receipt = match notifier.send_email(message).await {
            Ok(receipt) => receipt,
            Err(err) => {
                summary.failures += 1;
                warn!(
                    user_id = %user.id,
                    threshold_months = reminder.threshold_months,
                    error = %err,
                    "failed to send expiry reminder"
                );
                continue;
            }
        };
        summary.emails_sent += 1;

        let rows: Vec<NewEmailReminderLog> = reminder
            .items
            .iter()
            .map(|item| NewEmailReminderLog {
                id: Uuid::new_v4(),
                user_id: user.id,
                employee_competency_id: item.employee_competency_id,
                threshold_months: reminder.threshold_months,
                reminder_year: today.year(),
                recipient: user.email.clone(),
                message_id: Some(receipt.id.clone()),
            })
            .collect();
        match diesel::insert_into(email_reminder_logs::table)
            .values(&rows)
            .execute(conn)
        {
            Ok(logged) => summary.reminders_logged += logged,
            Err(err) => {
                summary.failures += 1;
                warn!(
                    user_id = %user.id,
                    threshold_months = reminder.threshold_months,
                    message_id = %receipt.id,
                    error = %err,
                    "expiry reminder sent but not logged"
                );
            }
        }

        activity.record(
            ActivityEvent::new(
                None,
                ActivityAction::ExpiryReminderSent,
                format!(
                    "Sent {}-month expiry reminder to {}",
                    reminder.threshold_months, user.email
                ),
            )
            .details(json!({
                "user_id": user.id,
                "threshold_months": reminder.threshold_months,
                "message_id": receipt.id,
                "competencies": reminder
                    .items
                    .iter()
                    .map(|item| item.employee_competency_id)
                    .collect::<Vec<_>>(),
            })),
        );
    }
    summary
}

fn expiry_email(
    user: &User,
    reminder: &PlannedReminder,
    manager_emails: &[String],
    today: NaiveDate,
    app_base_url: &str,
) -> EmailMessage {
    let mut to = vec![user.email.clone()];
    for manager in manager_emails {
        if !to.contains(manager) {
            to.push(manager.clone());
        }
    }

    let mut rows = String::new();
    for item in &reminder.items {
        rows.push_str(&format!(
            "<li><strong>{}</strong> expires on {} ({} days)</li>",
            escape_html(&item.label),
            item.expiry_date,
            (item.expiry_date - today).num_days()
        ));
    }
    let name = user.full_name.as_deref().unwrap_or(user.email.as_str());
    EmailMessage {
        to,
        subject: format!(
            "Competency expiry reminder: {} item(s) expire within {} month(s)",
            reminder.items.len(),
            reminder.threshold_months
        ),
        html: format!(
            "<p>Hello {},</p><p>The following competencies are approaching their expiry date:</p><ul>{}</ul><p><a href=\"{}/competencies\">Review your competencies</a></p>",
            escape_html(name),
            rows,
            app_base_url.trim_end_matches('/')
        ),
    }
}

fn normalize_thresholds(mut values: Vec<i32>) -> ControlResult<Vec<i32>> {
    if values.iter().any(|months| *months <= 0) {
        return Err(ControlError::validation(
            "reminder thresholds must be positive month counts",
        ));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn normalize_emails(values: Vec<String>) -> ControlResult<Vec<String>> {
    let mut emails = Vec::with_capacity(values.len());
    for value in values {
        let email = value.trim().to_lowercase();
        if email.is_empty() {
            continue;
        }
        if !email.contains('@') {
            return Err(ControlError::validation(format!(
                "invalid manager email address: {email}"
            )));
        }
        if !emails.contains(&email) {
            emails.push(email);
        }
    }
    Ok(emails)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate(user_id: Uuid, expiry_date: NaiveDate) -> ReminderCandidate {
        ReminderCandidate {
            employee_competency_id: Uuid::new_v4(),
            user_id,
            competency_id: Uuid::new_v4(),
            label: "PCN Level 2 UT".into(),
            expiry_date,
        }
    }

    #[test]
    fn smallest_matching_threshold_wins() {
        let thresholds = [1, 3, 6];
        assert_eq!(threshold_for(0, &thresholds), Some(1));
        assert_eq!(threshold_for(25, &thresholds), Some(1));
        assert_eq!(threshold_for(30, &thresholds), Some(1));
        assert_eq!(threshold_for(31, &thresholds), Some(3));
        assert_eq!(threshold_for(180, &thresholds), Some(6));
        assert_eq!(threshold_for(181, &thresholds), None);
        assert_eq!(threshold_for(-1, &thresholds), None);
    }

    #[test]
    fn groups_by_user_and_threshold() {
        let today = date(2026, 10, 14);
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let candidates = vec![
            candidate(user, date(2026, 10, 20)),
            candidate(user, date(2026, 11, 1)),
            candidate(user, date(2027, 1, 1)),
            candidate(other, date(2026, 10, 30)),
        ];
        let plan = plan_reminders(&candidates, &[3, 1], &HashSet::new(), today);
        assert_eq!(plan.len(), 3);
        let first_month: Vec<_> = plan
            .iter()
            .filter(|reminder| reminder.user_id == user && reminder.threshold_months == 1)
            .collect();
        assert_eq!(first_month.len(), 1);
        assert_eq!(first_month[0].items.len(), 2);
    }

    #[test]
    fn already_sent_thresholds_are_skipped() {
        let today = date(2026, 10, 14);
        let user = Uuid::new_v4();
        let due = candidate(user, date(2026, 11, 8));
        let candidates = vec![due.clone()];

        let first = plan_reminders(&candidates, &[1], &HashSet::new(), today);
        assert_eq!(first.len(), 1);

        let sent: HashSet<(Uuid, i32)> = first
            .iter()
            .flat_map(|reminder| {
                reminder
                    .items
                    .iter()
                    .map(move |item| (item.employee_competency_id, reminder.threshold_months))
            })
            .collect();
        let second = plan_reminders(&candidates, &[1], &sent, today);
        assert!(second.is_empty());
    }

    #[test]
    fn crossing_into_a_smaller_threshold_sends_again() {
        let user = Uuid::new_v4();
        let due = candidate(user, date(2027, 1, 1));
        let sent = HashSet::from([(due.employee_competency_id, 3)]);
        let plan = plan_reminders(&[due], &[1, 3], &sent, date(2026, 12, 10));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].threshold_months, 1);
    }

    #[test]
    fn managers_receive_a_copy() {
        let user = User {
            id: Uuid::new_v4(),
            email: "tech@example.com".into(),
            full_name: None,
            role: "employee".into(),
            organization_id: Uuid::new_v4(),
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };
        let today = date(2026, 10, 14);
        let reminder = PlannedReminder {
            user_id: user.id,
            threshold_months: 1,
            items: vec![candidate(user.id, date(2026, 11, 1))],
        };
        let email = expiry_email(
            &user,
            &reminder,
            &["qa@example.com".to_string(), "tech@example.com".to_string()],
            today,
            "https://app.example",
        );
        assert_eq!(email.to, vec!["tech@example.com", "qa@example.com"]);
        assert!(email.html.contains("(18 days)"));
    }

    #[test]
    fn thresholds_are_validated_and_sorted() {
        assert_eq!(normalize_thresholds(vec![6, 1, 3, 1]).unwrap(), vec![1, 3, 6]);
        assert!(normalize_thresholds(vec![0]).is_err());
    }

    #[test]
    fn manager_emails_are_normalized() {
        let emails =
            normalize_emails(vec![" QA@Example.com ".into(), "qa@example.com".into(), "".into()])
                .unwrap();
        assert_eq!(emails, vec!["qa@example.com"]);
        assert!(normalize_emails(vec!["not-an-email".into()]).is_err());
    }
}
