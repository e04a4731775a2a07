use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::to_iso;
use crate::auth::policy::{Action, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::lifecycle::reminders::{self, ReminderRunSummary, ReminderSettingsUpdate};
use crate::models::EmailReminderSettings;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct UpdateSettingsRequest {
    pub is_enabled: Option<bool>,
    pub thresholds_months: Option<Vec<i32>>,
    pub manager_emails: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct ReminderSettingsResponse {
    pub is_enabled: bool,
    pub thresholds_months: Vec<i32>,
    pub manager_emails: Vec<String>,
    pub updated_by: Option<Uuid>,
    pub updated_at: String,
}

pub async fn get_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReminderSettingsResponse>> {
    let ctx = state.command(&user);
    ctx.require(Action::ManageReminders, Resource::Global)?;
    let mut conn = state.db()?;
    let settings = reminders::get_reminder_settings(&mut conn)?;
    Ok(Json(to_settings_response(settings)))
}

pub async fn update_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateSettingsRequest>,
) -> AppResult<Json<ReminderSettingsResponse>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let settings = reminders::update_reminder_settings(
        &mut conn,
        &ctx,
        ReminderSettingsUpdate {
            is_enabled: payload.is_enabled,
            thresholds_months: payload.thresholds_months,
            manager_emails: payload.manager_emails,
        },
    )?;
    Ok(Json(to_settings_response(settings)))
}

pub async fn trigger_reminders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReminderRunSummary>> {
    let ctx = state.command(&user);
    ctx.require(Action::ManageReminders, Resource::Global)?;
    let mut conn = state.db()?;
    let summary = reminders::trigger_expiration_reminders(
        &mut conn,
        state.notifier.as_ref(),
        &state.activity,
        ctx.today,
        &state.config.app_base_url,
    )
    .await?;
    Ok(Json(summary))
}

pub async fn send_to_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ReminderRunSummary>> {
    let mut conn = state.db()?;
    let ctx = state.command(&user);
    let summary = reminders::send_expiry_reminder_to_user(
        &mut conn,
        state.notifier.as_ref(),
        &ctx,
        user_id,
        &state.config.app_base_url,
    )
    .await?;
    Ok(Json(summary))
}

fn to_settings_response(settings: EmailReminderSettings) -> ReminderSettingsResponse {
    ReminderSettingsResponse {
        is_enabled: settings.is_enabled,
        thresholds_months: settings.thresholds_months,
        manager_emails: settings.manager_emails,
        updated_by: settings.updated_by,
        updated_at: to_iso(settings.updated_at),
    }
}
