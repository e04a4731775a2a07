use uuid::Uuid;

use super::AuthenticatedUser;
use crate::error::{ControlError, ControlResult};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MANAGER: &str = "manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageCategories,
    CreateDocument,
    EditDocument,
    WithdrawDocument,
    AuthorRevision,
    SubmitRevision,
    ReviewRevision,
    CompleteReview,
    ViewDocument,
    SubmitCompetency,
    VerifyCompetency,
    ViewCompetency,
    ManageReminders,
}

impl Action {
    pub fn describe(self) -> &'static str {
        match self {
            Action::ManageCategories => "manage document categories",
            Action::CreateDocument => "create documents",
            Action::EditDocument => "edit this document",
            Action::WithdrawDocument => "withdraw this document",
            Action::AuthorRevision => "author revisions for this document",
            Action::SubmitRevision => "submit this revision for review",
            Action::ReviewRevision => "review this revision",
            Action::CompleteReview => "complete reviews for this document",
            Action::ViewDocument => "view this document",
            Action::SubmitCompetency => "submit this competency",
            Action::VerifyCompetency => "verify competencies",
            Action::ViewCompetency => "view this competency",
            Action::ManageReminders => "manage expiry reminders",
        }
    }
}

/// What an action is performed on. `owner_id` is the document owner or the
/// employee a competency belongs to.
#[derive(Debug, Clone, Copy)]
pub enum Resource {
    Organization(Uuid),
    Document { organization_id: Uuid, owner_id: Uuid },
    Competency { owner_id: Uuid },
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

pub trait AccessPolicy: Send + Sync + 'static {
    fn authorize(&self, actor: &AuthenticatedUser, action: Action, resource: Resource) -> Decision;
}

pub fn require(
    policy: &dyn AccessPolicy,
    actor: &AuthenticatedUser,
    action: Action,
    resource: Resource,
) -> ControlResult<()> {
    match policy.authorize(actor, action, resource) {
        Decision::Allow => Ok(()),
        Decision::Deny => Err(ControlError::Forbidden(action.describe())),
    }
}

/// Role-based default: tenants never see each other, admins may do anything,
/// managers review, owners maintain their own records.
#[derive(Debug, Default, Clone, Copy)]
pub struct RolePolicy;

impl AccessPolicy for RolePolicy {
    fn authorize(&self, actor: &AuthenticatedUser, action: Action, resource: Resource) -> Decision {
        let organization = match resource {
            Resource::Organization(org) => Some(org),
            Resource::Document {
                organization_id, ..
            } => Some(organization_id),
            Resource::Competency { .. } | Resource::Global => None,
        };
        if organization.is_some_and(|org| org != actor.organization_id) {
            return Decision::Deny;
        }

        let role = actor.role.as_str();
        if role == ROLE_ADMIN {
            return Decision::Allow;
        }
        let is_manager = role == ROLE_MANAGER;
        let is_owner = match resource {
            Resource::Document { owner_id, .. } | Resource::Competency { owner_id } => {
                owner_id == actor.user_id
            }
            Resource::Organization(_) | Resource::Global => false,
        };

        let allowed = match action {
            Action::ManageCategories | Action::WithdrawDocument | Action::ManageReminders => false,
            Action::CreateDocument | Action::ReviewRevision | Action::VerifyCompetency => {
                is_manager
            }
            Action::EditDocument
            | Action::AuthorRevision
            | Action::SubmitRevision
            | Action::CompleteReview => is_manager || is_owner,
            Action::ViewDocument => true,
            Action::SubmitCompetency | Action::ViewCompetency => is_manager || is_owner,
        };

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}
