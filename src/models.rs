use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub organization_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub organization_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_categories)]
pub struct DocumentCategory {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_categories)]
pub struct NewDocumentCategory {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub doc_number: String,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub organization_id: Uuid,
    pub status: String,
    pub review_period_months: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_revisions)]
#[diesel(belongs_to(Document))]
pub struct DocumentRevision {
    pub id: Uuid,
    pub document_id: Uuid,
    pub revision_number: i32,
    pub change_summary: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub status: String,
    pub submitted_by: Option<Uuid>,
    pub submitted_at: Option<NaiveDateTime>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub review_comments: Option<String>,
    pub is_review_only: bool,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_revisions)]
pub struct NewDocumentRevision {
    pub id: Uuid,
    pub document_id: Uuid,
    pub revision_number: i32,
    pub change_summary: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub status: String,
    pub is_review_only: bool,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_review_schedules)]
#[diesel(belongs_to(Document))]
pub struct DocumentReviewSchedule {
    pub id: Uuid,
    pub document_id: Uuid,
    pub due_date: NaiveDate,
    pub status: String,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<NaiveDateTime>,
    pub no_changes_needed: bool,
    pub review_notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_review_schedules)]
pub struct NewDocumentReviewSchedule {
    pub id: Uuid,
    pub document_id: Uuid,
    pub due_date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = employee_competencies)]
pub struct EmployeeCompetency {
    pub id: Uuid,
    pub user_id: Uuid,
    pub competency_id: Uuid,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub document_name: Option<String>,
    pub status: String,
    pub witness_checked: bool,
    pub witnessed_by: Option<Uuid>,
    pub witnessed_at: Option<NaiveDateTime>,
    pub witness_notes: Option<String>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = employee_competencies)]
pub struct NewEmployeeCompetency {
    pub id: Uuid,
    pub user_id: Uuid,
    pub competency_id: Uuid,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub document_name: Option<String>,
    pub status: String,
    pub witness_checked: bool,
    pub witnessed_by: Option<Uuid>,
    pub witnessed_at: Option<NaiveDateTime>,
    pub witness_notes: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = competency_history)]
#[diesel(belongs_to(EmployeeCompetency))]
pub struct CompetencyHistoryEntry {
    pub id: Uuid,
    pub employee_competency_id: Uuid,
    pub user_id: Uuid,
    pub competency_id: Uuid,
    pub action: String,
    pub status: String,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub notes: Option<String>,
    pub changed_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = competency_history)]
pub struct NewCompetencyHistoryEntry {
    pub id: Uuid,
    pub employee_competency_id: Uuid,
    pub user_id: Uuid,
    pub competency_id: Uuid,
    pub action: String,
    pub status: String,
    pub value: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub notes: Option<String>,
    pub changed_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = email_reminder_settings)]
pub struct EmailReminderSettings {
    pub id: i32,
    pub is_enabled: bool,
    pub thresholds_months: Vec<i32>,
    pub manager_emails: Vec<String>,
    pub updated_by: Option<Uuid>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = email_reminder_logs)]
pub struct EmailReminderLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub employee_competency_id: Uuid,
    pub threshold_months: i32,
    pub reminder_year: i32,
    pub recipient: String,
    pub message_id: Option<String>,
    pub sent_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = email_reminder_logs)]
pub struct NewEmailReminderLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub employee_competency_id: Uuid,
    pub threshold_months: i32,
    pub reminder_year: i32,
    pub recipient: String,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = activity_logs)]
pub struct ActivityLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action_type: String,
    pub action_category: String,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub entity_name: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = activity_logs)]
pub struct NewActivityLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action_type: String,
    pub action_category: String,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub entity_name: Option<String>,
}
