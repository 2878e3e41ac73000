//! # Authorization Gate
//!
//! Pre-execution hook that asks the access control service whether the
//! execution principal may use every entity a step refers to. The gate fails
//! closed: a missing principal, a missing answer or an explicit denial all
//! stop the step before any of its logic runs.

use crate::config::AuthConfig;
use crate::constants::events;
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::events::EventPublisher;
use crate::models::entity_reference::EntityReference;
use crate::models::execution_context::{ExecutionContext, ExecutionPrincipal};
use crate::models::step_parameters::StepParameters;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One question for the access control service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub principal: ExecutionPrincipal,
    pub permission: String,
    pub resource: EntityReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCheckResult {
    pub check: PermissionCheck,
    pub permitted: bool,
}

/// External access control service
#[async_trait]
pub trait AccessControlClient: Send + Sync + std::fmt::Debug {
    /// Answer a batch of checks. Results are matched back by content, so
    /// their order does not matter.
    async fn check_access(&self, checks: &[PermissionCheck]) -> GatekeeperResult<Vec<AccessCheckResult>>;
}

#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    client: Arc<dyn AccessControlClient>,
    enabled: bool,
    event_publisher: Option<EventPublisher>,
}

impl AuthorizationGate {
    pub fn new(client: Arc<dyn AccessControlClient>, config: &AuthConfig) -> Self {
        Self {
            client,
            enabled: config.enabled,
            event_publisher: None,
        }
    }

    pub fn with_event_publisher(mut self, event_publisher: EventPublisher) -> Self {
        self.event_publisher = Some(event_publisher);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Build the permission checks for a step. Pure, no I/O.
    pub fn permission_checks(
        ctx: &ExecutionContext,
        params: &StepParameters,
    ) -> GatekeeperResult<Vec<PermissionCheck>> {
        let principal = ctx.principal.clone().ok_or_else(|| GatekeeperError::AccessDenied {
            principal: "<none>".to_string(),
            permission: "*".to_string(),
            resource: format!("step {}", params.identifier),
            scope: ctx.scope_path(),
        })?;

        Ok(params
            .entity_refs
            .iter()
            .map(|entity| PermissionCheck {
                principal: principal.clone(),
                permission: entity.resource_type.runtime_permission().to_string(),
                resource: entity.clone(),
            })
            .collect())
    }

    /// Verify the principal may run this step. Returns `AccessDenied` naming
    /// the first refused permission and its scope.
    pub async fn check_runtime_permissions(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
    ) -> GatekeeperResult<()> {
        if !self.enabled {
            debug!(
                node_execution_id = %ctx.node_execution_id,
                step = %params.identifier,
                "Authorization disabled - skipping runtime permission checks"
            );
            return Ok(());
        }

        let result = self.evaluate(ctx, params).await;

        match &result {
            Ok(()) => {
                debug!(
                    node_execution_id = %ctx.node_execution_id,
                    step = %params.identifier,
                    entities = params.entity_refs.len(),
                    "Runtime permissions granted"
                );
                self.publish(events::STEP_AUTHORIZED, ctx, params, None).await;
            }
            Err(err @ GatekeeperError::AccessDenied { .. }) => {
                warn!(
                    node_execution_id = %ctx.node_execution_id,
                    step = %params.identifier,
                    error = %err,
                    "Runtime permission denied"
                );
                self.publish(events::STEP_ACCESS_DENIED, ctx, params, Some(err.to_string()))
                    .await;
            }
            Err(err) => {
                warn!(
                    node_execution_id = %ctx.node_execution_id,
                    error = %err,
                    "Access control check failed"
                );
            }
        }

        result
    }

    async fn evaluate(&self, ctx: &ExecutionContext, params: &StepParameters) -> GatekeeperResult<()> {
        let checks = Self::permission_checks(ctx, params)?;
        if checks.is_empty() {
            return Ok(());
        }

        let results = self.client.check_access(&checks).await?;

        for check in &checks {
            let permitted = results
                .iter()
                .any(|result| result.permitted && result.check == *check);
            if !permitted {
                return Err(GatekeeperError::AccessDenied {
                    principal: check.principal.principal_id.clone(),
                    permission: check.permission.clone(),
                    resource: check.resource.to_string(),
                    scope: check.resource.scope.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn publish(
        &self,
        event_name: &str,
        ctx: &ExecutionContext,
        params: &StepParameters,
        error: Option<String>,
    ) {
        if let Some(publisher) = &self.event_publisher {
            let context = json!({
                "node_execution_id": ctx.node_execution_id,
                "plan_execution_id": ctx.plan_execution_id,
                "step_identifier": params.identifier,
                "step_type": params.step_type,
                "error": error,
            });
            if let Err(err) = publisher.publish(event_name, context).await {
                info!(error = %err, event = event_name, "Failed to publish authorization event");
            }
        }
    }
}
