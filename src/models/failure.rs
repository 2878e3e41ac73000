//! # Failure Outcomes
//!
//! The failure payload attached to a step response when a step ends without
//! succeeding. Failure types let the orchestrator tell a business outcome
//! (an approval was rejected) apart from an infrastructure error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    /// The execution principal is not allowed to run the step
    AuthorizationError,
    /// Malformed step input (constraint spec, timeout expression, ...)
    InputValidationError,
    /// An approver rejected the approval
    ApprovalRejection,
    /// An approval passed its deadline without a decision
    ApprovalExpired,
    /// A delegated task or child reported a failure
    TaskFailure,
    /// Anything else raised by step logic
    ApplicationError,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AuthorizationError => "AUTHORIZATION_ERROR",
            Self::InputValidationError => "INPUT_VALIDATION_ERROR",
            Self::ApprovalRejection => "APPROVAL_REJECTION",
            Self::ApprovalExpired => "APPROVAL_EXPIRED",
            Self::TaskFailure => "TASK_FAILURE",
            Self::ApplicationError => "APPLICATION_ERROR",
        };
        f.write_str(label)
    }
}

/// Human readable failure message plus its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    pub failure_types: Vec<FailureType>,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>, failure_type: FailureType) -> Self {
        Self {
            message: message.into(),
            failure_types: vec![failure_type],
        }
    }

    pub fn has_type(&self, failure_type: FailureType) -> bool {
        self.failure_types.contains(&failure_type)
    }
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
