//! Best-effort audit trail.
//!
//! Commands hand events to [`ActivityLogger::record`] after their transaction
//! commits. Events go onto an in-process queue drained by a single consumer
//! task that appends them to `activity_logs`. Nothing on this path can fail
//! the command that produced the event.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::NewActivityLog;
use crate::schema::activity_logs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    CategoryCreated,
    CategoryUpdated,
    CategoryReordered,
    CategoryDeleted,
    DocumentCreated,
    DocumentUpdated,
    DocumentWithdrawn,
    RevisionCreated,
    RevisionSubmittedForReview,
    RevisionApproved,
    RevisionRejected,
    DocumentReviewCompleted,
    CompetencyCreated,
    CompetencyUpdated,
    CompetencyApproved,
    CompetencyRejected,
    CompetencyChangesRequested,
    CompetencyExpired,
    ReminderSettingsUpdated,
    ExpiryReminderSent,
    ReviewReminderSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Admin,
    Document,
    Competency,
    Notification,
}

impl ActivityCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityCategory::Admin => "admin",
            ActivityCategory::Document => "document",
            ActivityCategory::Competency => "competency",
            ActivityCategory::Notification => "notification",
        }
    }
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityAction::CategoryCreated => "category_created",
            ActivityAction::CategoryUpdated => "category_updated",
            ActivityAction::CategoryReordered => "category_reordered",
            ActivityAction::CategoryDeleted => "category_deleted",
            ActivityAction::DocumentCreated => "document_created",
            ActivityAction::DocumentUpdated => "document_updated",
            ActivityAction::DocumentWithdrawn => "document_withdrawn",
            ActivityAction::RevisionCreated => "revision_created",
            ActivityAction::RevisionSubmittedForReview => "revision_submitted_for_review",
            ActivityAction::RevisionApproved => "revision_approved",
            ActivityAction::RevisionRejected => "revision_rejected",
            ActivityAction::DocumentReviewCompleted => "document_review_completed",
            ActivityAction::CompetencyCreated => "competency_created",
            ActivityAction::CompetencyUpdated => "competency_updated",
            ActivityAction::CompetencyApproved => "competency_approved",
            ActivityAction::CompetencyRejected => "competency_rejected",
            ActivityAction::CompetencyChangesRequested => "competency_changes_requested",
            ActivityAction::CompetencyExpired => "competency_expired",
            ActivityAction::ReminderSettingsUpdated => "reminder_settings_updated",
            ActivityAction::ExpiryReminderSent => "expiry_reminder_sent",
            ActivityAction::ReviewReminderSent => "review_reminder_sent",
        }
    }

    pub fn category(self) -> ActivityCategory {
        match self {
            ActivityAction::CategoryCreated
            | ActivityAction::CategoryUpdated
            | ActivityAction::CategoryReordered
            | ActivityAction::CategoryDeleted
            | ActivityAction::ReminderSettingsUpdated => ActivityCategory::Admin,
            ActivityAction::DocumentCreated
            | ActivityAction::DocumentUpdated
            | ActivityAction::DocumentWithdrawn
            | ActivityAction::RevisionCreated
            | ActivityAction::RevisionSubmittedForReview
            | ActivityAction::RevisionApproved
            | ActivityAction::RevisionRejected
            | ActivityAction::DocumentReviewCompleted => ActivityCategory::Document,
            ActivityAction::CompetencyCreated
            | ActivityAction::CompetencyUpdated
            | ActivityAction::CompetencyApproved
            | ActivityAction::CompetencyRejected
            | ActivityAction::CompetencyChangesRequested
            | ActivityAction::CompetencyExpired => ActivityCategory::Competency,
            ActivityAction::ExpiryReminderSent | ActivityAction::ReviewReminderSent => {
                ActivityCategory::Notification
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub user_id: Option<Uuid>,
    pub action: ActivityAction,
    pub description: String,
    pub details: Option<Value>,
    pub entity_type: Option<&'static str>,
    pub entity_id: Option<Uuid>,
    pub entity_name: Option<String>,
}

impl ActivityEvent {
    pub fn new(user_id: Option<Uuid>, action: ActivityAction, description: impl Into<String>) -> Self {
        Self {
            user_id,
            action,
            description: description.into(),
            details: None,
            entity_type: None,
            entity_id: None,
            entity_name: None,
        }
    }

    pub fn entity(mut self, entity_type: &'static str, id: Uuid, name: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type);
        self.entity_id = Some(id);
        self.entity_name = Some(name.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn into_row(self) -> NewActivityLog {
        NewActivityLog {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            action_type: self.action.as_str().to_string(),
            action_category: self.action.category().as_str().to_string(),
            description: self.description,
            details: self.details,
            entity_type: self.entity_type.map(str::to_string),
            entity_id: self.entity_id,
            entity_name: self.entity_name,
        }
    }
}

#[derive(Clone)]
pub struct ActivityLogger {
    sender: Option<mpsc::UnboundedSender<ActivityEvent>>,
}

impl ActivityLogger {
    /// Starts the consumer task on the current runtime.
    pub fn spawn(pool: PgPool) -> Self {
        let (logger, receiver) = Self::channel();
        tokio::spawn(drain(pool, receiver));
        logger
    }

    /// Queue whose receiving end belongs to the caller.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ActivityEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn record(&self, event: ActivityEvent) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if let Err(err) = sender.send(event) {
            warn!(action = err.0.action.as_str(), "activity log queue unavailable; event dropped");
        }
    }
}

/// Writes queued events until every sender has been dropped.
pub async fn drain(pool: PgPool, mut receiver: mpsc::UnboundedReceiver<ActivityEvent>) {
    while let Some(event) = receiver.recv().await {
        persist(pool.clone(), event).await;
    }
    debug!("activity log queue closed");
}

async fn persist(pool: PgPool, event: ActivityEvent) {
    let action = event.action.as_str();
    let row = event.into_row();
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn = pool.get()?;
        diesel::insert_into(activity_logs::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(action, error = %err, "failed to write activity log"),
        Err(err) => warn!(action, error = %err, "activity log writer panicked"),
    }
}
