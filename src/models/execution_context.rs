//! # Execution Context
//!
//! Immutable coordinates of one in-flight node execution. The orchestrator
//! creates a context once per node execution and every component below it
//! only ever reads it.
//!
//! The `expression_functor_token` scopes any secret resolution performed on
//! behalf of the step; it grows monotonically across the plan execution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of principal that triggered the execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    User,
    ServiceAccount,
    ApiKey,
    System,
}

/// Principal on whose behalf the step runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionPrincipal {
    pub principal_id: String,
    pub principal_type: PrincipalType,
}

impl ExecutionPrincipal {
    pub fn user(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            principal_type: PrincipalType::User,
        }
    }

    pub fn service_account(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            principal_type: PrincipalType::ServiceAccount,
        }
    }
}

impl fmt::Display for ExecutionPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.principal_type, self.principal_id)
    }
}

/// Identifiers threaded through every coordination call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub account_id: String,
    pub org_id: String,
    pub project_id: String,
    pub pipeline_id: String,
    pub plan_execution_id: String,
    /// Execution id of the enclosing stage, when the step runs inside one
    pub stage_execution_id: Option<String>,
    pub node_execution_id: String,
    pub step_identifier: String,
    pub step_type: String,
    pub expression_functor_token: i64,
    pub principal: Option<ExecutionPrincipal>,
}

impl ExecutionContext {
    /// Create a context for a node execution. Optional coordinates start empty
    /// and are filled with the `with_*` methods.
    pub fn new(
        account_id: impl Into<String>,
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        plan_execution_id: impl Into<String>,
        node_execution_id: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            org_id: org_id.into(),
            project_id: project_id.into(),
            pipeline_id: pipeline_id.into(),
            plan_execution_id: plan_execution_id.into(),
            stage_execution_id: None,
            node_execution_id: node_execution_id.into(),
            step_identifier: String::new(),
            step_type: String::new(),
            expression_functor_token: 0,
            principal: None,
        }
    }

    pub fn with_stage_execution(mut self, stage_execution_id: impl Into<String>) -> Self {
        self.stage_execution_id = Some(stage_execution_id.into());
        self
    }

    pub fn with_step(mut self, identifier: impl Into<String>, step_type: impl Into<String>) -> Self {
        self.step_identifier = identifier.into();
        self.step_type = step_type.into();
        self
    }

    pub fn with_principal(mut self, principal: ExecutionPrincipal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_expression_functor_token(mut self, token: i64) -> Self {
        self.expression_functor_token = token;
        self
    }

    /// `account/org/project` path used in log lines and denial messages
    pub fn scope_path(&self) -> String {
        format!("{}/{}/{}", self.account_id, self.org_id, self.project_id)
    }
}
