use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    UnderReview,
    Approved,
    Withdrawn,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::UnderReview => "under_review",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Withdrawn => "withdrawn",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(DocumentStatus::Draft),
            "under_review" => Ok(DocumentStatus::UnderReview),
            "approved" => Ok(DocumentStatus::Approved),
            "withdrawn" => Ok(DocumentStatus::Withdrawn),
            other => Err(ControlError::validation(format!(
                "unknown document status '{other}'"
            ))),
        }
    }
}

/// ```text
/// draft --submit--> under_review --approve--> approved --(next approval)--> superseded
///                        |
///                        +--reject--> rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    Draft,
    UnderReview,
    Approved,
    Rejected,
    Superseded,
}

impl RevisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RevisionStatus::Draft => "draft",
            RevisionStatus::UnderReview => "under_review",
            RevisionStatus::Approved => "approved",
            RevisionStatus::Rejected => "rejected",
            RevisionStatus::Superseded => "superseded",
        }
    }

    /// Commands with a single permitted source state.
    pub fn required_for(command: RevisionCommand) -> RevisionStatus {
        match command {
            RevisionCommand::Submit => RevisionStatus::Draft,
            RevisionCommand::Approve | RevisionCommand::Reject => RevisionStatus::UnderReview,
        }
    }
}

impl FromStr for RevisionStatus {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(RevisionStatus::Draft),
            "under_review" => Ok(RevisionStatus::UnderReview),
            "approved" => Ok(RevisionStatus::Approved),
            "rejected" => Ok(RevisionStatus::Rejected),
            "superseded" => Ok(RevisionStatus::Superseded),
            other => Err(ControlError::validation(format!(
                "unknown revision status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionCommand {
    Submit,
    Approve,
    Reject,
}

impl RevisionCommand {
    pub fn target(self) -> RevisionStatus {
        match self {
            RevisionCommand::Submit => RevisionStatus::UnderReview,
            RevisionCommand::Approve => RevisionStatus::Approved,
            RevisionCommand::Reject => RevisionStatus::Rejected,
        }
    }
}

/// Fails unless `current` is the source state `command` requires.
pub fn guard_revision(current: &str, command: RevisionCommand) -> ControlResult<RevisionStatus> {
    let required = RevisionStatus::required_for(command);
    if current != required.as_str() {
        return Err(ControlError::invalid_transition(
            "revision",
            current,
            required.as_str(),
        ));
    }
    Ok(command.target())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Due,
    Overdue,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Due => "due",
            ScheduleStatus::Overdue => "overdue",
            ScheduleStatus::Completed => "completed",
        }
    }

    pub const OPEN: [&'static str; 3] = ["pending", "due", "overdue"];
}

impl FromStr for ScheduleStatus {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ScheduleStatus::Pending),
            "due" => Ok(ScheduleStatus::Due),
            "overdue" => Ok(ScheduleStatus::Overdue),
            "completed" => Ok(ScheduleStatus::Completed),
            other => Err(ControlError::validation(format!(
                "unknown schedule status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetencyStatus {
    PendingApproval,
    Active,
    Rejected,
    Expired,
    ChangesRequested,
}

impl CompetencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompetencyStatus::PendingApproval => "pending_approval",
            CompetencyStatus::Active => "active",
            CompetencyStatus::Rejected => "rejected",
            CompetencyStatus::Expired => "expired",
            CompetencyStatus::ChangesRequested => "changes_requested",
        }
    }
}

impl FromStr for CompetencyStatus {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending_approval" => Ok(CompetencyStatus::PendingApproval),
            "active" => Ok(CompetencyStatus::Active),
            "rejected" => Ok(CompetencyStatus::Rejected),
            "expired" => Ok(CompetencyStatus::Expired),
            "changes_requested" => Ok(CompetencyStatus::ChangesRequested),
            other => Err(ControlError::validation(format!(
                "unknown competency status '{other}'"
            ))),
        }
    }
}
