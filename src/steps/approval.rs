//! # Approval Step
//!
//! Built-in async step backed by an approval instance. Execution creates the
//! instance and suspends on its callback id; the approval service wakes the
//! step when the instance reaches a terminal status.

use crate::approvals::{resolve_timeout_millis, ApprovalService};
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::execution::continuation::Continuation;
use crate::execution::traits::{AsyncExecutable, ResponseMap, StepExecutable};
use crate::execution::types::{AsyncExecutableResponse, StepInputPackage, StepResponse, StepStatus};
use crate::models::execution_context::ExecutionContext;
use crate::models::failure::FailureType;
use crate::models::step_parameters::StepParameters;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ApprovalStep {
    service: Arc<ApprovalService>,
}

impl ApprovalStep {
    pub fn new(service: Arc<ApprovalService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StepExecutable for ApprovalStep {
    async fn validate_resources(&self, _ctx: &ExecutionContext, params: &StepParameters) -> GatekeeperResult<()> {
        if params.approval_spec().is_none() {
            return Err(GatekeeperError::InvalidParameters(format!(
                "step '{}' carries no approval spec",
                params.identifier
            )));
        }
        resolve_timeout_millis(params.timeout.as_ref(), &self.service.config().default_timeout)?;
        Ok(())
    }

    async fn handle_abort(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        continuation: &Continuation,
    ) -> GatekeeperResult<()> {
        for callback_id in &continuation.awaiting {
            let Ok(id) = Uuid::parse_str(callback_id) else {
                continue;
            };
            match self.service.abort(id).await {
                Ok(_) => {}
                Err(err) if err.is_no_op() => {
                    debug!(approval_id = %id, "Approval already resolved at abort");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncExecutable for ApprovalStep {
    async fn execute_async_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<AsyncExecutableResponse> {
        let instance = self.service.create(ctx, params).await?;
        Ok(AsyncExecutableResponse::awaiting(vec![instance.callback_id]))
    }

    async fn handle_async_response(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse> {
        let data = responses.values().next().ok_or_else(|| {
            GatekeeperError::StateMachine("approval step resumed without an outcome".to_string())
        })?;

        let Some(failure) = data.failure_info() else {
            return Ok(data.clone().into_step_response());
        };
        let status = if failure.has_type(FailureType::ApprovalRejection) {
            StepStatus::ApprovalRejected
        } else if failure.has_type(FailureType::ApprovalExpired) {
            StepStatus::Expired
        } else {
            StepStatus::Failed
        };
        Ok(StepResponse::with_status(
            status,
            data.outputs().clone(),
            Some(failure.clone()),
        ))
    }
}
