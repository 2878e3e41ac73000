//! Error types for the coordination core.
//!

use crate::models::failure::{FailureInfo, FailureType};
use crate::state_machine::ApprovalStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatekeeperError {
    #[error("Access denied: principal '{principal}' lacks permission '{permission}' on {resource} in scope {scope}")]
    AccessDenied {
        principal: String,
        permission: String,
        resource: String,
        scope: String,
    },
    #[error("Invalid resource constraint: {0}")]
    InvalidConstraint(String),
    #[error("Invalid timeout '{value}': {reason}")]
    InvalidTimeout { value: String, reason: String },
    #[error("Approval instance {id} is already resolved with status {status}")]
    AlreadyResolved { id: Uuid, status: ApprovalStatus },
    #[error("Approval instance {0} not found")]
    ApprovalNotFound(Uuid),
    #[error("Approval not permitted: {0}")]
    ApprovalNotPermitted(String),
    #[error("No executable registered for step type '{0}'")]
    StepNotRegistered(String),
    #[error("Invalid step parameters: {0}")]
    InvalidParameters(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("State machine error: {0}")]
    StateMachine(String),
    #[error("Callback delivery failed: {0}")]
    Callback(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatekeeperError {
    /// Whether this error is a terminal caller/authoring error that the
    /// orchestrator should record as the step's failure outcome.
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied { .. }
                | Self::InvalidConstraint(_)
                | Self::InvalidTimeout { .. }
                | Self::InvalidParameters(_)
                | Self::ApprovalNotPermitted(_)
        )
    }

    /// `AlreadyResolved` is informational: the caller lost a race or retried.
    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::AlreadyResolved { .. })
    }

    /// Convert into the failure payload reported back to the orchestrator.
    pub fn to_failure_info(&self) -> FailureInfo {
        let failure_type = match self {
            Self::AccessDenied { .. } => FailureType::AuthorizationError,
            Self::InvalidConstraint(_)
            | Self::InvalidTimeout { .. }
            | Self::InvalidParameters(_) => FailureType::InputValidationError,
            Self::ApprovalNotPermitted(_) => FailureType::AuthorizationError,
            _ => FailureType::ApplicationError,
        };
        FailureInfo::new(self.to_string(), failure_type)
    }
}

impl From<serde_json::Error> for GatekeeperError {
    fn from(error: serde_json::Error) -> Self {
        GatekeeperError::Persistence(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for GatekeeperError {
    fn from(err: sqlx::Error) -> Self {
        GatekeeperError::Persistence(err.to_string())
    }
}

impl From<crate::state_machine::StateMachineError> for GatekeeperError {
    fn from(err: crate::state_machine::StateMachineError) -> Self {
        GatekeeperError::StateMachine(err.to_string())
    }
}

impl From<crate::config::ConfigurationError> for GatekeeperError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        GatekeeperError::Configuration(err.to_string())
    }
}

pub type GatekeeperResult<T> = Result<T, GatekeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_message_names_permission_and_scope() {
        let err = GatekeeperError::AccessDenied {
            principal: "alice".to_string(),
            permission: "core_environment_access".to_string(),
            resource: "ENVIRONMENT/prod".to_string(),
            scope: "acc/org/proj".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("core_environment_access"));
        assert!(message.contains("acc/org/proj"));
        assert!(err.is_step_failure());
        assert_eq!(
            err.to_failure_info().failure_types,
            vec![FailureType::AuthorizationError]
        );
    }

    #[test]
    fn test_already_resolved_is_not_a_step_failure() {
        let err = GatekeeperError::AlreadyResolved {
            id: Uuid::new_v4(),
            status: ApprovalStatus::Approved,
        };
        assert!(!err.is_step_failure());
        assert!(err.is_no_op());
    }

    #[test]
    fn test_sqlx_errors_become_persistence_errors() {
        let err: GatekeeperError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, GatekeeperError::Persistence(_)));
    }
}
