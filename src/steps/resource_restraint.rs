//! # Resource Restraint Step
//!
//! Built-in async step that holds a node until it owns a permit on a
//! resource lane. Execution enqueues the node; an immediate grant completes
//! it in the same dispatch, otherwise the queue wakes it on promotion.
//!
//! The permit is not released when the step finishes. It belongs to the
//! holding scope (pipeline, stage or group). When that scope ends the
//! orchestrator calls [`ResourceConstraintQueue::release_entity`] with the
//! release entity recorded on the instance (the stage execution id for
//! stage scopes, the plan execution id otherwise), or releases a single
//! node through [`ResourceConstraintQueue::release`].

use crate::constraints::{grant_outputs, AcquireRequest, ResourceConstraintQueue};
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::execution::continuation::Continuation;
use crate::execution::traits::{AsyncExecutable, ResponseMap, StepExecutable};
use crate::execution::types::{AsyncExecutableResponse, ResponseData, StepInputPackage, StepResponse};
use crate::models::execution_context::ExecutionContext;
use crate::models::resource_restraint::{HoldingScope, ResourceRestraint, ScopeLevel};
use crate::models::step_parameters::{ResourceRestraintSpec, StepParameters};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ResourceRestraintStep {
    queue: Arc<ResourceConstraintQueue>,
}

impl ResourceRestraintStep {
    pub fn new(queue: Arc<ResourceConstraintQueue>) -> Self {
        Self { queue }
    }

    /// Restraint declared by `params`, with the holding scope bound to the
    /// execution in `ctx`
    pub fn restraint(ctx: &ExecutionContext, params: &StepParameters) -> GatekeeperResult<ResourceRestraint> {
        let spec = Self::spec(params)?;
        let restraint = ResourceRestraint::new(
            spec.name.clone(),
            spec.resource_unit.clone(),
            Self::holding_scope(ctx, spec)?,
            spec.permits,
            spec.acquire_mode,
        );
        restraint.validate()?;
        Ok(restraint)
    }

    fn spec(params: &StepParameters) -> GatekeeperResult<&ResourceRestraintSpec> {
        params.resource_restraint_spec().ok_or_else(|| {
            GatekeeperError::InvalidParameters(format!(
                "step '{}' carries no resource restraint spec",
                params.identifier
            ))
        })
    }

    fn holding_scope(ctx: &ExecutionContext, spec: &ResourceRestraintSpec) -> GatekeeperResult<HoldingScope> {
        let scope_id = match spec.scope {
            ScopeLevel::Pipeline => ctx.plan_execution_id.clone(),
            ScopeLevel::Stage => ctx.stage_execution_id.clone().ok_or_else(|| {
                GatekeeperError::InvalidConstraint(format!(
                    "stage scoped constraint '{}' used outside a stage",
                    spec.name
                ))
            })?,
            ScopeLevel::Group => spec.group.clone().ok_or_else(|| {
                GatekeeperError::InvalidConstraint(format!(
                    "group scoped constraint '{}' names no group",
                    spec.name
                ))
            })?,
        };
        Ok(HoldingScope::new(spec.scope, scope_id))
    }

    /// Execution whose completion frees the permit
    fn release_entity(ctx: &ExecutionContext, scope: &HoldingScope) -> String {
        match scope.level {
            ScopeLevel::Stage => scope.scope_id.clone(),
            ScopeLevel::Pipeline | ScopeLevel::Group => ctx.plan_execution_id.clone(),
        }
    }
}

#[async_trait]
impl StepExecutable for ResourceRestraintStep {
    async fn validate_resources(&self, ctx: &ExecutionContext, params: &StepParameters) -> GatekeeperResult<()> {
        Self::restraint(ctx, params).map(|_| ())
    }

    async fn handle_abort(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        _continuation: &Continuation,
    ) -> GatekeeperResult<()> {
        let key = Self::restraint(ctx, params)?.constraint_key();
        let cancelled = self.queue.cancel(&key, &ctx.node_execution_id).await?;
        debug!(
            node_execution_id = %ctx.node_execution_id,
            constraint_key = %key,
            cancelled = cancelled.is_some(),
            "Resource restraint step aborted"
        );
        Ok(())
    }
}

#[async_trait]
impl AsyncExecutable for ResourceRestraintStep {
    async fn execute_async_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<AsyncExecutableResponse> {
        let restraint = Self::restraint(ctx, params)?;
        let release_entity_id = Self::release_entity(ctx, &restraint.holding_scope);
        let request = AcquireRequest::new(restraint, ctx.node_execution_id.clone())
            .with_release_entity(release_entity_id)
            .with_plan_execution(ctx.plan_execution_id.clone());

        let outcome = self.queue.acquire_with(request).await?;
        let instance = outcome.instance();
        let callback_id = instance.id.to_string();

        let mut immediate = HashMap::new();
        if outcome.is_granted() {
            immediate.insert(callback_id.clone(), ResponseData::success(grant_outputs(instance)));
        }

        Ok(AsyncExecutableResponse {
            callback_ids: vec![callback_id],
            immediate,
        })
    }

    async fn handle_async_response(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse> {
        let data = responses.values().next().ok_or_else(|| {
            GatekeeperError::StateMachine("resource restraint resumed without a grant".to_string())
        })?;
        Ok(data.clone().into_step_response())
    }
}
