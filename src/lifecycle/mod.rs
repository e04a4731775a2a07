//! Document control and competency approval lifecycles.
//!
//! Every command takes a [`CommandContext`] naming the actor, the access
//! policy to consult, the audit queue, and the date the command is executed
//! on. State changes happen inside a single database transaction; audit
//! events are queued only once that transaction has committed.

use chrono::{Months, NaiveDate};
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::activity::{ActivityEvent, ActivityLogger};
use crate::auth::policy::{self, AccessPolicy, Action, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::{ControlError, ControlResult};
use crate::models::User;
use crate::schema::users;

pub mod categories;
pub mod competencies;
pub mod documents;
pub mod reminders;
pub mod reviews;
pub mod revisions;
pub mod search;
pub mod status;

pub struct CommandContext<'a> {
    pub actor: &'a AuthenticatedUser,
    pub policy: &'a dyn AccessPolicy,
    pub activity: &'a ActivityLogger,
    pub today: NaiveDate,
}

impl<'a> CommandContext<'a> {
    pub fn actor_id(&self) -> Uuid {
        self.actor.user_id
    }

    pub fn require(&self, action: Action, resource: Resource) -> ControlResult<()> {
        policy::require(self.policy, self.actor, action, resource)
    }

    pub fn record(&self, event: ActivityEvent) {
        self.activity.record(event);
    }
}

/// Calendar-month addition, clamped to the last day of shorter months
/// (31 Jan + 1 month = 28/29 Feb).
pub fn add_months(date: NaiveDate, months: i32) -> ControlResult<NaiveDate> {
    let months = u32::try_from(months)
        .map_err(|_| ControlError::validation("review period must not be negative"))?;
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| ControlError::validation("review date out of range"))
}

/// Loads a user of the actor's own organization. Users of other
/// organizations read as missing.
pub(crate) fn organization_member(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    user_id: Uuid,
) -> ControlResult<User> {
    users::table
        .find(user_id)
        .filter(users::organization_id.eq(ctx.actor.organization_id))
        .first(conn)
        .optional()?
        .ok_or(ControlError::NotFound("user"))
}
