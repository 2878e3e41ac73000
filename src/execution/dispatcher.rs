//! # Step Dispatcher
//!
//! Entry point the orchestrator uses to run one node execution. The
//! dispatcher looks up the executable for the step type, runs the
//! authorization gate and the step's own `validate_resources`, and only then
//! calls the shape-specific `*_after_rbac` method.
//!
//! Suspending shapes persist a [`Continuation`]; completions come back
//! through [`StepDispatcher::resume`] and the matching handler runs once
//! every awaited correlation id has been delivered.

use super::continuation::{AbortRecord, Continuation, ContinuationStore, ResponseRecord};
use super::traits::{Executable, ExecutionMode};
use super::types::{
    ChildChainExecutableResponse, ResponseData, StepInputPackage, StepResponse, TaskRequest,
};
use crate::authorization::AuthorizationGate;
use crate::constants::events;
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::events::EventPublisher;
use crate::logging::log_step_operation;
use crate::models::execution_context::ExecutionContext;
use crate::models::step_parameters::StepParameters;
use crate::registry::StepRegistry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Work the orchestrator must start for a freshly suspended step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SuspensionRequest {
    Callbacks(Vec<String>),
    Task(TaskRequest),
    Child { child_node_id: String },
    ChildChainLink { child_node_id: String, last_link: bool },
    Children(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub node_execution_id: String,
    pub mode: ExecutionMode,
    /// Correlation ids the step still waits on
    pub awaiting: Vec<String>,
    /// Set only when the step has just suspended and new work must be started
    pub request: Option<SuspensionRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed(StepResponse),
    Suspended(Suspension),
    /// The step is still executing. The abort is recorded and the pending
    /// `start` or `resume` call returns the aborted response.
    AbortRequested,
    /// Nothing to do: unknown node, unexpected correlation id, or already
    /// finished
    Ignored,
}

impl DispatchOutcome {
    pub fn response(&self) -> Option<&StepResponse> {
        match self {
            Self::Completed(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }
}

enum Progress {
    Suspend(Continuation, SuspensionRequest),
    /// Nothing left to await; settle the reservation before completing
    Settle(Continuation),
    Resumed(Continuation),
    Done(StepResponse),
}

#[derive(Debug, Clone)]
pub struct StepDispatcher {
    registry: Arc<StepRegistry>,
    gate: Arc<AuthorizationGate>,
    continuations: Arc<dyn ContinuationStore>,
    event_publisher: EventPublisher,
}

impl StepDispatcher {
    pub fn new(
        registry: Arc<StepRegistry>,
        gate: Arc<AuthorizationGate>,
        continuations: Arc<dyn ContinuationStore>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            registry,
            gate,
            continuations,
            event_publisher,
        }
    }

    /// Authorization gate plus the step's own resource validation. No side
    /// effects and no suspension.
    pub async fn validate_resources(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
    ) -> GatekeeperResult<()> {
        let executable = self.registry.get(&params.step_type)?;
        self.validate_with(&executable, ctx, params).await
    }

    async fn validate_with(
        &self,
        executable: &Executable,
        ctx: &ExecutionContext,
        params: &StepParameters,
    ) -> GatekeeperResult<()> {
        self.gate.check_runtime_permissions(ctx, params).await?;
        executable.validate_resources(ctx, params).await
    }

    /// Run a step for the first time
    pub async fn start(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<DispatchOutcome> {
        let executable = self.registry.get(&params.step_type)?;
        let node_execution_id = ctx.node_execution_id.as_str();

        log_step_operation(
            "start",
            node_execution_id,
            Some(&params.step_type),
            "validating",
            None,
        );

        if let Err(err) = self.validate_with(&executable, ctx, params).await {
            return self.fail_or_propagate(ctx, err).await;
        }

        let mode = executable.mode();
        if mode != ExecutionMode::Sync {
            self.continuations.reserve(node_execution_id).await?;
        }

        match self.execute(&executable, ctx, params, inputs).await {
            Ok(progress) => self.drive(progress).await,
            Err(err) => {
                if mode != ExecutionMode::Sync {
                    self.continuations.take(node_execution_id).await?;
                }
                self.fail_or_propagate(ctx, err).await
            }
        }
    }

    /// Deliver a completion for a suspended step
    pub async fn resume(
        &self,
        node_execution_id: &str,
        correlation_id: &str,
        data: ResponseData,
    ) -> GatekeeperResult<DispatchOutcome> {
        let record = self
            .continuations
            .record_response(node_execution_id, correlation_id, data)
            .await?;

        match record {
            ResponseRecord::UnknownNode
            | ResponseRecord::UnexpectedCorrelation
            | ResponseRecord::Aborted(_) => {
                debug!(
                    node_execution_id = %node_execution_id,
                    correlation_id = %correlation_id,
                    outcome = ?record,
                    "Ignoring completion signal"
                );
                Ok(DispatchOutcome::Ignored)
            }
            ResponseRecord::Buffered => Ok(DispatchOutcome::Suspended(Suspension {
                node_execution_id: node_execution_id.to_string(),
                mode: ExecutionMode::Async,
                awaiting: Vec::new(),
                request: None,
            })),
            ResponseRecord::Pending { remaining } => {
                let mode = self
                    .continuations
                    .get(node_execution_id)
                    .await?
                    .map(|continuation| continuation.mode)
                    .unwrap_or(ExecutionMode::Async);
                Ok(DispatchOutcome::Suspended(Suspension {
                    node_execution_id: node_execution_id.to_string(),
                    mode,
                    awaiting: remaining,
                    request: None,
                }))
            }
            ResponseRecord::Complete(continuation) => {
                self.publish(events::STEP_RESUMED, &continuation.context, json!({
                    "correlation_id": correlation_id,
                }))
                .await;
                self.drive(Progress::Resumed(continuation)).await
            }
        }
    }

    /// Abort a step: run its abort hook and drop the continuation. A step
    /// that is still executing is aborted as soon as it returns.
    pub async fn abort(&self, node_execution_id: &str) -> GatekeeperResult<DispatchOutcome> {
        match self.continuations.abort(node_execution_id).await? {
            AbortRecord::Taken(continuation) => self.finish_abort(continuation).await,
            AbortRecord::Marked => {
                info!(
                    node_execution_id = %node_execution_id,
                    "Abort requested while step is executing"
                );
                Ok(DispatchOutcome::AbortRequested)
            }
            AbortRecord::UnknownNode => Ok(DispatchOutcome::Ignored),
        }
    }

    async fn finish_abort(&self, continuation: Continuation) -> GatekeeperResult<DispatchOutcome> {
        let node_execution_id = continuation.node_execution_id.as_str();
        let executable = self.registry.get(&continuation.parameters.step_type)?;
        executable
            .handle_abort(&continuation.context, &continuation.parameters, &continuation)
            .await?;

        log_step_operation(
            "abort",
            node_execution_id,
            Some(&continuation.parameters.step_type),
            "aborted",
            None,
        );
        self.publish(events::STEP_ABORTED, &continuation.context, json!({}))
            .await;

        Ok(DispatchOutcome::Completed(StepResponse::aborted()))
    }

    async fn execute(
        &self,
        executable: &Executable,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<Progress> {
        let suspend = |mode: ExecutionMode, awaiting: Vec<String>| {
            Continuation::new(mode, ctx.clone(), params.clone(), awaiting)
        };

        let progress = match executable {
            Executable::Sync(step) => {
                Progress::Done(step.execute_sync_after_rbac(ctx, params, inputs).await?)
            }
            Executable::Async(step) => {
                let response = step.execute_async_after_rbac(ctx, params, inputs).await?;
                let awaiting: Vec<String> = response
                    .callback_ids
                    .iter()
                    .filter(|id| !response.immediate.contains_key(*id))
                    .cloned()
                    .collect();
                let continuation = suspend(ExecutionMode::Async, awaiting.clone())
                    .with_responses(response.immediate);
                Progress::Suspend(continuation, SuspensionRequest::Callbacks(awaiting))
            }
            Executable::Task(step) => {
                let task = step.obtain_task_after_rbac(ctx, params, inputs).await?;
                let continuation = suspend(ExecutionMode::Task, vec![task.task_id.to_string()]);
                Progress::Suspend(continuation, SuspensionRequest::Task(task))
            }
            Executable::Child(step) => {
                let child = step.obtain_child_after_rbac(ctx, params, inputs).await?;
                let continuation = suspend(ExecutionMode::Child, vec![child.child_node_id.clone()])
                    .with_pass_through(child.pass_through);
                Progress::Suspend(
                    continuation,
                    SuspensionRequest::Child {
                        child_node_id: child.child_node_id,
                    },
                )
            }
            Executable::ChildChain(step) => {
                let link = step.execute_first_link_after_rbac(ctx, params, inputs).await?;
                Self::chain_progress(suspend(ExecutionMode::ChildChain, Vec::new()), link)
            }
            Executable::Children(step) => {
                let children = step.obtain_children_after_rbac(ctx, params, inputs).await?;
                let continuation =
                    suspend(ExecutionMode::Children, children.child_node_ids.clone());
                Progress::Suspend(
                    continuation,
                    SuspensionRequest::Children(children.child_node_ids),
                )
            }
        };

        Ok(progress)
    }

    fn chain_progress(continuation: Continuation, link: ChildChainExecutableResponse) -> Progress {
        match link.child_node_id {
            Some(child_node_id) => {
                let mut continuation = continuation
                    .with_pass_through(link.pass_through)
                    .with_last_link(link.last_link);
                continuation.awaiting = vec![child_node_id.clone()];
                Progress::Suspend(
                    continuation,
                    SuspensionRequest::ChildChainLink {
                        child_node_id,
                        last_link: link.last_link,
                    },
                )
            }
            // Nothing left to run: finalize with what has been collected
            None => {
                let mut continuation = continuation
                    .with_pass_through(link.pass_through)
                    .with_last_link(true);
                continuation.awaiting.clear();
                Progress::Settle(continuation)
            }
        }
    }

    async fn drive(&self, mut progress: Progress) -> GatekeeperResult<DispatchOutcome> {
        loop {
            progress = match progress {
                Progress::Done(response) => {
                    self.record_completion(&response).await;
                    return Ok(DispatchOutcome::Completed(response));
                }
                Progress::Suspend(continuation, request) => {
                    let node_execution_id = continuation.node_execution_id.clone();
                    let mode = continuation.mode;
                    let context = continuation.context.clone();

                    match self.continuations.save(continuation).await? {
                        ResponseRecord::Complete(continuation) => Progress::Resumed(continuation),
                        ResponseRecord::Aborted(continuation) => {
                            return self.finish_abort(continuation).await
                        }
                        ResponseRecord::Pending { remaining } => {
                            log_step_operation(
                                "suspend",
                                &node_execution_id,
                                Some(&context.step_type),
                                "suspended",
                                Some(&format!("awaiting {}", remaining.len())),
                            );
                            self.publish(events::STEP_SUSPENDED, &context, json!({
                                "mode": mode.to_string(),
                                "awaiting": remaining,
                            }))
                            .await;
                            return Ok(DispatchOutcome::Suspended(Suspension {
                                node_execution_id,
                                mode,
                                awaiting: remaining,
                                request: Some(request),
                            }));
                        }
                        other => {
                            return Err(GatekeeperError::StateMachine(format!(
                                "unexpected continuation save outcome {other:?}"
                            )))
                        }
                    }
                }
                Progress::Settle(continuation) => match self.continuations.save(continuation).await? {
                    ResponseRecord::Complete(continuation) => Progress::Resumed(continuation),
                    ResponseRecord::Aborted(continuation) => {
                        return self.finish_abort(continuation).await
                    }
                    other => {
                        return Err(GatekeeperError::StateMachine(format!(
                            "unexpected continuation settle outcome {other:?}"
                        )))
                    }
                },
                Progress::Resumed(continuation) => {
                    let context = continuation.context.clone();
                    match self.complete(continuation).await {
                        Ok(next) => next,
                        Err(err) => return self.fail_or_propagate(&context, err).await,
                    }
                }
            };
        }
    }

    /// Run the handler matching a continuation whose awaited responses have
    /// all arrived
    async fn complete(&self, continuation: Continuation) -> GatekeeperResult<Progress> {
        let executable = self.registry.get(&continuation.parameters.step_type)?;
        let ctx = &continuation.context;
        let params = &continuation.parameters;
        let responses = &continuation.responses;

        let response = match (&executable, continuation.mode) {
            (Executable::Async(step), ExecutionMode::Async) => {
                step.handle_async_response(ctx, params, responses).await?
            }
            (Executable::Task(step), ExecutionMode::Task) => {
                let data = single_response(&continuation)?;
                step.handle_task_result(ctx, params, data).await?
            }
            (Executable::Child(step), ExecutionMode::Child) => {
                let data = single_response(&continuation)?;
                step.handle_child_response(ctx, params, &continuation.pass_through, data)
                    .await?
            }
            (Executable::Children(step), ExecutionMode::Children) => {
                step.handle_children_response(ctx, params, responses).await?
            }
            (Executable::ChildChain(step), ExecutionMode::ChildChain) => {
                if continuation.last_link {
                    step.finalize_execution(ctx, params, &continuation.pass_through, responses)
                        .await?
                } else {
                    // Every new link is a fresh side effect and is authorized again
                    self.continuations.reserve(&continuation.node_execution_id).await?;
                    let link = match self.validate_with(&executable, ctx, params).await {
                        Ok(()) => {
                            step.execute_next_link_after_rbac(
                                ctx,
                                params,
                                &continuation.pass_through,
                                responses,
                            )
                            .await
                        }
                        Err(err) => Err(err),
                    };
                    let link = match link {
                        Ok(link) => link,
                        Err(err) => {
                            self.continuations.take(&continuation.node_execution_id).await?;
                            return Err(err);
                        }
                    };
                    let next = Continuation::new(
                        ExecutionMode::ChildChain,
                        ctx.clone(),
                        params.clone(),
                        Vec::new(),
                    )
                    .with_responses(responses.clone());
                    return Ok(Self::chain_progress(next, link));
                }
            }
            (executable, mode) => {
                return Err(GatekeeperError::StateMachine(format!(
                    "continuation for {} was suspended as {mode} but step type {} is now {}",
                    continuation.node_execution_id,
                    params.step_type,
                    executable.mode()
                )))
            }
        };

        Ok(Progress::Done(response))
    }

    /// Terminal caller errors become a failed step response; anything else is
    /// an infrastructure error for the orchestrator to retry
    async fn fail_or_propagate(
        &self,
        ctx: &ExecutionContext,
        err: GatekeeperError,
    ) -> GatekeeperResult<DispatchOutcome> {
        if !err.is_step_failure() {
            warn!(
                node_execution_id = %ctx.node_execution_id,
                error = %err,
                "Step dispatch failed"
            );
            return Err(err);
        }

        let response = StepResponse::failed(err.to_failure_info());
        log_step_operation(
            "fail",
            &ctx.node_execution_id,
            Some(&ctx.step_type),
            "failed",
            Some(&err.to_string()),
        );
        self.publish(events::STEP_FAILED, ctx, json!({ "error": err.to_string() }))
            .await;
        Ok(DispatchOutcome::Completed(response))
    }

    async fn record_completion(&self, response: &StepResponse) {
        info!(status = %response.status, "Step completed");
        let event = if response.is_success() {
            events::STEP_COMPLETED
        } else {
            events::STEP_FAILED
        };
        if let Err(err) = self
            .event_publisher
            .publish(event, json!({ "status": response.status.to_string() }))
            .await
        {
            debug!(error = %err, "Failed to publish step completion");
        }
    }

    async fn publish(&self, event_name: &str, ctx: &ExecutionContext, mut context: serde_json::Value) {
        if let Some(map) = context.as_object_mut() {
            map.insert("node_execution_id".to_string(), json!(ctx.node_execution_id));
            map.insert("plan_execution_id".to_string(), json!(ctx.plan_execution_id));
            map.insert("step_type".to_string(), json!(ctx.step_type));
        }
        if let Err(err) = self.event_publisher.publish(event_name, context).await {
            debug!(error = %err, event = event_name, "Failed to publish step event");
        }
    }
}

fn single_response(continuation: &Continuation) -> GatekeeperResult<&ResponseData> {
    continuation.responses.values().next().ok_or_else(|| {
        GatekeeperError::StateMachine(format!(
            "continuation for {} completed without a response",
            continuation.node_execution_id
        ))
    })
}
