use crate::models::approval_instance::ApprovalAction;
use serde::{Deserialize, Serialize};

/// Events that can trigger approval status transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ApprovalEvent {
    /// Explicit approval decision
    Approve,
    /// Explicit rejection decision
    Reject,
    /// Sweeper detected a missed deadline
    Expire,
    /// Owning step aborted
    Abort,
    /// Unrecoverable error with message
    Fail(String),
}

impl ApprovalEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Expire => "expire",
            Self::Abort => "abort",
            Self::Fail(_) => "fail",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

impl From<ApprovalAction> for ApprovalEvent {
    fn from(action: ApprovalAction) -> Self {
        match action {
            ApprovalAction::Approve => Self::Approve,
            ApprovalAction::Reject => Self::Reject,
        }
    }
}
