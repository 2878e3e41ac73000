//! # Executable Contract
//!
//! One trait per execution shape. Every shape extends [`StepExecutable`],
//! whose `validate_resources` hook runs after the authorization gate and
//! before any `*_after_rbac` method. The dispatcher is the only caller of the
//! `*_after_rbac` methods, so no step logic is reachable without both checks
//! passing.
//!
//! [`Executable`] is the tagged union the dispatcher matches on.

use super::continuation::Continuation;
use super::types::{
    AsyncExecutableResponse, ChildChainExecutableResponse, ChildExecutableResponse,
    ChildrenExecutableResponse, ResponseData, StepInputPackage, StepResponse, TaskRequest,
};
use crate::error::GatekeeperResult;
use crate::models::execution_context::ExecutionContext;
use crate::models::step_parameters::StepParameters;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Responses collected while a step was suspended, keyed by correlation id
pub type ResponseMap = HashMap<String, ResponseData>;

/// Behaviour shared by every execution shape
#[async_trait]
pub trait StepExecutable: Send + Sync {
    /// Step specific pre-execution check. Must be free of side effects.
    async fn validate_resources(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
    ) -> GatekeeperResult<()> {
        Ok(())
    }

    /// Called when the orchestrator aborts a suspended step
    async fn handle_abort(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        _continuation: &Continuation,
    ) -> GatekeeperResult<()> {
        Ok(())
    }
}

/// Shape 0: fire-and-forget, returns the final response directly
#[async_trait]
pub trait SyncExecutable: StepExecutable {
    async fn execute_sync_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<StepResponse>;
}

/// Shape 1: suspends until every returned callback id is notified
#[async_trait]
pub trait AsyncExecutable: StepExecutable {
    async fn execute_async_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<AsyncExecutableResponse>;

    async fn handle_async_response(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse>;
}

/// Shape 2: delegates a task to an external worker
#[async_trait]
pub trait TaskExecutable: StepExecutable {
    async fn obtain_task_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<TaskRequest>;

    async fn handle_task_result(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        response: &ResponseData,
    ) -> GatekeeperResult<StepResponse>;
}

/// Shape 3: spawns one child node
#[async_trait]
pub trait ChildExecutable: StepExecutable {
    async fn obtain_child_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<ChildExecutableResponse>;

    async fn handle_child_response(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        pass_through: &Value,
        response: &ResponseData,
    ) -> GatekeeperResult<StepResponse>;
}

/// Shape 4: runs children one after another
#[async_trait]
pub trait ChildChainExecutable: StepExecutable {
    async fn execute_first_link_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<ChildChainExecutableResponse>;

    async fn execute_next_link_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        pass_through: &Value,
        responses: &ResponseMap,
    ) -> GatekeeperResult<ChildChainExecutableResponse>;

    async fn finalize_execution(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        pass_through: &Value,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse>;
}

/// Shape 5: spawns many children and waits for all of them
#[async_trait]
pub trait ChildrenExecutable: StepExecutable {
    async fn obtain_children_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<ChildrenExecutableResponse>;

    async fn handle_children_response(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse>;
}

/// Execution shape tag persisted with a continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
    Task,
    Child,
    ChildChain,
    Children,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::Task => "task",
            Self::Child => "child",
            Self::ChildChain => "child_chain",
            Self::Children => "children",
        };
        f.write_str(label)
    }
}

/// A registered step implementation, tagged with its execution shape
#[derive(Clone)]
pub enum Executable {
    Sync(Arc<dyn SyncExecutable>),
    Async(Arc<dyn AsyncExecutable>),
    Task(Arc<dyn TaskExecutable>),
    Child(Arc<dyn ChildExecutable>),
    ChildChain(Arc<dyn ChildChainExecutable>),
    Children(Arc<dyn ChildrenExecutable>),
}

impl Executable {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Sync(_) => ExecutionMode::Sync,
            Self::Async(_) => ExecutionMode::Async,
            Self::Task(_) => ExecutionMode::Task,
            Self::Child(_) => ExecutionMode::Child,
            Self::ChildChain(_) => ExecutionMode::ChildChain,
            Self::Children(_) => ExecutionMode::Children,
        }
    }

    pub async fn validate_resources(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
    ) -> GatekeeperResult<()> {
        match self {
            Self::Sync(step) => step.validate_resources(ctx, params).await,
            Self::Async(step) => step.validate_resources(ctx, params).await,
            Self::Task(step) => step.validate_resources(ctx, params).await,
            Self::Child(step) => step.validate_resources(ctx, params).await,
            Self::ChildChain(step) => step.validate_resources(ctx, params).await,
            Self::Children(step) => step.validate_resources(ctx, params).await,
        }
    }

    pub async fn handle_abort(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        continuation: &Continuation,
    ) -> GatekeeperResult<()> {
        match self {
            Self::Sync(step) => step.handle_abort(ctx, params, continuation).await,
            Self::Async(step) => step.handle_abort(ctx, params, continuation).await,
            Self::Task(step) => step.handle_abort(ctx, params, continuation).await,
            Self::Child(step) => step.handle_abort(ctx, params, continuation).await,
            Self::ChildChain(step) => step.handle_abort(ctx, params, continuation).await,
            Self::Children(step) => step.handle_abort(ctx, params, continuation).await,
        }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Executable").field(&self.mode()).finish()
    }
}
