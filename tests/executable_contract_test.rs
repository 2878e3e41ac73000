//! The six execution shapes driven through the dispatcher, plus the
//! built-in steps end to end.

mod common;

use async_trait::async_trait;
use common::*;
use gatekeeper_core::constraints::ResourceConstraintQueue;
use gatekeeper_core::error::{GatekeeperError, GatekeeperResult};
use gatekeeper_core::execution::{
    AsyncExecutable, AsyncExecutableResponse, ChildChainExecutable, ChildChainExecutableResponse,
    ChildExecutable, ChildExecutableResponse, ChildrenExecutable, ChildrenExecutableResponse,
    Continuation, DispatchOutcome, Executable, ExecutionMode, ResponseData, ResponseMap,
    StepDispatcher, StepExecutable, StepInputPackage, StepResponse, StepStatus, SuspensionRequest,
    SyncExecutable, TaskExecutable, TaskRequest,
};
use gatekeeper_core::models::{
    ApprovalDecision, ApprovalType, ExecutionContext, ExecutionPrincipal, FailureInfo,
    FailureType, StepParameters, StepSpec,
};
use gatekeeper_core::steps::ResourceRestraintStep;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

fn generic_params(step_type: &str) -> StepParameters {
    StepParameters::new("custom", step_type, StepSpec::Generic(json!({})))
        .with_entity_ref(environment_ref("prod"))
}

fn suspension(outcome: &DispatchOutcome) -> &gatekeeper_core::execution::Suspension {
    match outcome {
        DispatchOutcome::Suspended(suspension) => suspension,
        other => panic!("expected a suspension, got {other:?}"),
    }
}

fn completed(outcome: DispatchOutcome) -> StepResponse {
    match outcome {
        DispatchOutcome::Completed(response) => response,
        other => panic!("expected completion, got {other:?}"),
    }
}

#[derive(Default)]
struct Echo {
    runs: AtomicUsize,
    reject_resources: bool,
}

#[async_trait]
impl StepExecutable for Echo {
    async fn validate_resources(&self, _ctx: &ExecutionContext, _params: &StepParameters) -> GatekeeperResult<()> {
        if self.reject_resources {
            return Err(GatekeeperError::InvalidParameters("connector missing".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncExecutable for Echo {
    async fn execute_sync_after_rbac(
        &self,
        ctx: &ExecutionContext,
        _params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<StepResponse> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(StepResponse::succeeded(json!({
            "node": ctx.node_execution_id,
            "greeting": inputs.get("greeting").cloned().unwrap_or(Value::Null),
        })))
    }
}

/// Waits on two callbacks and reports how many arrived. Optionally delivers
/// one of them itself before returning from execution.
#[derive(Default)]
struct Wait {
    aborted: AtomicUsize,
    early: Mutex<Option<Arc<StepDispatcher>>>,
}

#[async_trait]
impl StepExecutable for Wait {
    async fn handle_abort(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        continuation: &Continuation,
    ) -> GatekeeperResult<()> {
        assert_eq!(continuation.mode, ExecutionMode::Async);
        self.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AsyncExecutable for Wait {
    async fn execute_async_after_rbac(
        &self,
        ctx: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<AsyncExecutableResponse> {
        let dispatcher = self.early.lock().clone();
        if let Some(dispatcher) = dispatcher {
            let outcome = dispatcher
                .resume(&ctx.node_execution_id, "cb-1", ResponseData::success(json!(1)))
                .await?;
            assert!(outcome.is_suspended());
        }
        Ok(AsyncExecutableResponse::awaiting(vec![
            "cb-1".to_string(),
            "cb-2".to_string(),
        ]))
    }

    async fn handle_async_response(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse> {
        Ok(StepResponse::succeeded(json!({ "received": responses.len() })))
    }
}

/// Holds execution open until the test lets it return
#[derive(Default)]
struct Hold {
    entered: Notify,
    proceed: Notify,
    aborted: AtomicUsize,
}

#[async_trait]
impl StepExecutable for Hold {
    async fn handle_abort(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        continuation: &Continuation,
    ) -> GatekeeperResult<()> {
        assert_eq!(continuation.awaiting, vec!["cb-1".to_string()]);
        self.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AsyncExecutable for Hold {
    async fn execute_async_after_rbac(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<AsyncExecutableResponse> {
        self.entered.notify_one();
        self.proceed.notified().await;
        Ok(AsyncExecutableResponse::awaiting(vec!["cb-1".to_string()]))
    }

    async fn handle_async_response(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        _responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse> {
        Ok(StepResponse::succeeded(json!({})))
    }
}

/// Queue step that pauses after enqueueing, before its continuation exists
struct HeldQueue {
    inner: ResourceRestraintStep,
    entered: Notify,
    proceed: Notify,
}

#[async_trait]
impl StepExecutable for HeldQueue {
    async fn validate_resources(&self, ctx: &ExecutionContext, params: &StepParameters) -> GatekeeperResult<()> {
        self.inner.validate_resources(ctx, params).await
    }

    async fn handle_abort(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        continuation: &Continuation,
    ) -> GatekeeperResult<()> {
        self.inner.handle_abort(ctx, params, continuation).await
    }
}

#[async_trait]
impl AsyncExecutable for HeldQueue {
    async fn execute_async_after_rbac(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> GatekeeperResult<AsyncExecutableResponse> {
        let response = self.inner.execute_async_after_rbac(ctx, params, inputs).await?;
        self.entered.notify_one();
        self.proceed.notified().await;
        Ok(response)
    }

    async fn handle_async_response(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse> {
        self.inner.handle_async_response(ctx, params, responses).await
    }
}

struct ShellTask;

impl StepExecutable for ShellTask {}

#[async_trait]
impl TaskExecutable for ShellTask {
    async fn obtain_task_after_rbac(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<TaskRequest> {
        Ok(TaskRequest::new("shell", json!({ "script": "make deploy" })))
    }

    async fn handle_task_result(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        response: &ResponseData,
    ) -> GatekeeperResult<StepResponse> {
        Ok(response.clone().into_step_response())
    }
}

struct Wrapper;

impl StepExecutable for Wrapper {}

#[async_trait]
impl ChildExecutable for Wrapper {
    async fn obtain_child_after_rbac(
        &self,
        ctx: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<ChildExecutableResponse> {
        Ok(ChildExecutableResponse {
            child_node_id: format!("{}-child", ctx.node_execution_id),
            pass_through: json!({ "attempt": 1 }),
        })
    }

    async fn handle_child_response(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        pass_through: &Value,
        response: &ResponseData,
    ) -> GatekeeperResult<StepResponse> {
        Ok(StepResponse::succeeded(json!({
            "attempt": pass_through["attempt"],
            "child": response.outputs(),
        })))
    }
}

/// Runs three links in order, carrying the link index in the pass-through
#[derive(Default)]
struct Chain {
    links_started: AtomicUsize,
}

const CHAIN_LENGTH: u64 = 3;

fn chain_link(index: u64) -> ChildChainExecutableResponse {
    ChildChainExecutableResponse::link(
        format!("link-{index}"),
        index + 1 == CHAIN_LENGTH,
        json!({ "index": index }),
    )
}

impl StepExecutable for Chain {}

#[async_trait]
impl ChildChainExecutable for Chain {
    async fn execute_first_link_after_rbac(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<ChildChainExecutableResponse> {
        self.links_started.fetch_add(1, Ordering::SeqCst);
        Ok(chain_link(0))
    }

    async fn execute_next_link_after_rbac(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        pass_through: &Value,
        _responses: &ResponseMap,
    ) -> GatekeeperResult<ChildChainExecutableResponse> {
        self.links_started.fetch_add(1, Ordering::SeqCst);
        let index = pass_through["index"].as_u64().unwrap_or_default();
        Ok(chain_link(index + 1))
    }

    async fn finalize_execution(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        pass_through: &Value,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse> {
        Ok(StepResponse::succeeded(json!({
            "last_index": pass_through["index"],
            "responses": responses.len(),
        })))
    }
}

struct Fanout;

impl StepExecutable for Fanout {}

#[async_trait]
impl ChildrenExecutable for Fanout {
    async fn obtain_children_after_rbac(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> GatekeeperResult<ChildrenExecutableResponse> {
        Ok(ChildrenExecutableResponse {
            child_node_ids: vec!["shard-1".to_string(), "shard-2".to_string(), "shard-3".to_string()],
        })
    }

    async fn handle_children_response(
        &self,
        _ctx: &ExecutionContext,
        _params: &StepParameters,
        responses: &ResponseMap,
    ) -> GatekeeperResult<StepResponse> {
        if let Some(failure) = responses.values().find_map(|data| data.failure_info()) {
            return Ok(StepResponse::failed(failure.clone()));
        }
        Ok(StepResponse::succeeded(json!({ "children": responses.len() })))
    }
}

#[tokio::test]
async fn test_sync_step_runs_after_authorization() {
    let harness = TestCore::new();
    let echo = Arc::new(Echo::default());
    harness.core.registry.register("Echo", Executable::Sync(echo.clone())).unwrap();

    let inputs = StepInputPackage::new().with_input("greeting", json!("hi"));
    let outcome = harness
        .core
        .dispatcher
        .start(&ctx("node-1"), &generic_params("Echo"), &inputs)
        .await
        .unwrap();

    let response = completed(outcome);
    assert!(response.is_success());
    assert_eq!(response.outputs["greeting"], json!("hi"));
    assert_eq!(echo.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_denied_principal_never_reaches_step_logic() {
    let harness = TestCore::new();
    let echo = Arc::new(Echo::default());
    harness.core.registry.register("Echo", Executable::Sync(echo.clone())).unwrap();

    let mallory = ctx("node-1").with_principal(ExecutionPrincipal::service_account("mallory"));
    let outcome = harness
        .core
        .dispatcher
        .start(&mallory, &generic_params("Echo"), &StepInputPackage::new())
        .await
        .unwrap();

    let response = completed(outcome);
    assert_eq!(response.status, StepStatus::Failed);
    assert!(response.has_failure_type(FailureType::AuthorizationError));
    let message = &response.failure.as_ref().unwrap().message;
    assert!(message.contains("mallory"));
    assert!(message.contains("core_environment_access"));
    assert_eq!(echo.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_resource_validation_skips_execution() {
    let harness = TestCore::new();
    let echo = Arc::new(Echo {
        reject_resources: true,
        ..Echo::default()
    });
    harness.core.registry.register("Echo", Executable::Sync(echo.clone())).unwrap();

    let err = harness
        .core
        .dispatcher
        .validate_resources(&ctx("node-1"), &generic_params("Echo"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatekeeperError::InvalidParameters(_)));

    let response = completed(
        harness
            .core
            .dispatcher
            .start(&ctx("node-1"), &generic_params("Echo"), &StepInputPackage::new())
            .await
            .unwrap(),
    );
    assert!(response.has_failure_type(FailureType::InputValidationError));
    assert_eq!(echo.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unregistered_step_type_is_an_error() {
    let harness = TestCore::new();
    let err = harness
        .core
        .dispatcher
        .start(&ctx("node-1"), &generic_params("Nope"), &StepInputPackage::new())
        .await
        .unwrap_err();
    assert_eq!(err, GatekeeperError::StepNotRegistered("Nope".to_string()));
}

#[tokio::test]
async fn test_async_step_waits_for_every_callback() {
    let harness = TestCore::new();
    harness.core.registry.register("Wait", Executable::Async(Arc::new(Wait::default()))).unwrap();
    let dispatcher = &harness.core.dispatcher;

    let outcome = dispatcher
        .start(&ctx("node-1"), &generic_params("Wait"), &StepInputPackage::new())
        .await
        .unwrap();
    let suspended = suspension(&outcome);
    assert_eq!(suspended.mode, ExecutionMode::Async);
    assert_eq!(
        suspended.request,
        Some(SuspensionRequest::Callbacks(vec!["cb-1".to_string(), "cb-2".to_string()]))
    );

    let partial = dispatcher
        .resume("node-1", "cb-2", ResponseData::success(json!(2)))
        .await
        .unwrap();
    assert_eq!(suspension(&partial).awaiting, vec!["cb-1".to_string()]);

    let stray = dispatcher
        .resume("node-1", "cb-9", ResponseData::success(json!(9)))
        .await
        .unwrap();
    assert_eq!(stray, DispatchOutcome::Ignored);

    let response = completed(
        dispatcher
            .resume("node-1", "cb-1", ResponseData::success(json!(1)))
            .await
            .unwrap(),
    );
    assert_eq!(response.outputs["received"], json!(2));

    // A duplicate after completion finds nothing to resume
    let late = dispatcher
        .resume("node-1", "cb-1", ResponseData::success(json!(1)))
        .await
        .unwrap();
    assert_eq!(late, DispatchOutcome::Ignored);
}

#[tokio::test]
async fn test_callback_arriving_during_execution_is_kept() {
    let harness = TestCore::new();
    let wait = Arc::new(Wait::default());
    *wait.early.lock() = Some(harness.core.dispatcher.clone());
    harness.core.registry.register("Wait", Executable::Async(wait)).unwrap();
    let dispatcher = &harness.core.dispatcher;

    let outcome = dispatcher
        .start(&ctx("node-1"), &generic_params("Wait"), &StepInputPackage::new())
        .await
        .unwrap();
    assert_eq!(suspension(&outcome).awaiting, vec!["cb-2".to_string()]);

    let response = completed(
        dispatcher
            .resume("node-1", "cb-2", ResponseData::success(json!(2)))
            .await
            .unwrap(),
    );
    assert_eq!(response.outputs["received"], json!(2));
}

#[tokio::test]
async fn test_abort_runs_hook_and_forgets_the_node() {
    let harness = TestCore::new();
    let wait = Arc::new(Wait::default());
    harness.core.registry.register("Wait", Executable::Async(wait.clone())).unwrap();
    let dispatcher = &harness.core.dispatcher;

    dispatcher
        .start(&ctx("node-1"), &generic_params("Wait"), &StepInputPackage::new())
        .await
        .unwrap();

    let response = completed(dispatcher.abort("node-1").await.unwrap());
    assert_eq!(response.status, StepStatus::Aborted);
    assert_eq!(wait.aborted.load(Ordering::SeqCst), 1);

    assert_eq!(dispatcher.abort("node-1").await.unwrap(), DispatchOutcome::Ignored);
    let late = dispatcher
        .resume("node-1", "cb-1", ResponseData::success(json!(1)))
        .await
        .unwrap();
    assert_eq!(late, DispatchOutcome::Ignored);
}

#[tokio::test]
async fn test_abort_during_execution_aborts_once_step_returns() {
    let harness = TestCore::new();
    let hold = Arc::new(Hold::default());
    harness.core.registry.register("Hold", Executable::Async(hold.clone())).unwrap();
    let dispatcher = harness.core.dispatcher.clone();

    let running = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .start(&ctx("node-1"), &generic_params("Hold"), &StepInputPackage::new())
                .await
        }
    });
    hold.entered.notified().await;

    assert_eq!(
        dispatcher.abort("node-1").await.unwrap(),
        DispatchOutcome::AbortRequested
    );
    assert_eq!(hold.aborted.load(Ordering::SeqCst), 0);
    let early = dispatcher
        .resume("node-1", "cb-1", ResponseData::success(json!(1)))
        .await
        .unwrap();
    assert_eq!(early, DispatchOutcome::Ignored);

    hold.proceed.notify_one();
    let response = completed(running.await.unwrap().unwrap());
    assert_eq!(response.status, StepStatus::Aborted);
    assert_eq!(hold.aborted.load(Ordering::SeqCst), 1);

    let late = dispatcher
        .resume("node-1", "cb-1", ResponseData::success(json!(1)))
        .await
        .unwrap();
    assert_eq!(late, DispatchOutcome::Ignored);
    assert_eq!(dispatcher.abort("node-1").await.unwrap(), DispatchOutcome::Ignored);
}

#[tokio::test]
async fn test_task_step_resumes_on_worker_result() {
    let harness = TestCore::new();
    harness.core.registry.register("Shell", Executable::Task(Arc::new(ShellTask))).unwrap();
    let dispatcher = &harness.core.dispatcher;

    let outcome = dispatcher
        .start(&ctx("node-1"), &generic_params("Shell"), &StepInputPackage::new())
        .await
        .unwrap();
    let task = match &suspension(&outcome).request {
        Some(SuspensionRequest::Task(task)) => task.clone(),
        other => panic!("expected a task request, got {other:?}"),
    };
    assert_eq!(task.task_type, "shell");

    let response = completed(
        dispatcher
            .resume(
                "node-1",
                &task.task_id.to_string(),
                ResponseData::failure(FailureInfo::new("exit 2", FailureType::TaskFailure)),
            )
            .await
            .unwrap(),
    );
    assert_eq!(response.status, StepStatus::Failed);
    assert!(response.has_failure_type(FailureType::TaskFailure));
}

#[tokio::test]
async fn test_child_step_receives_pass_through() {
    let harness = TestCore::new();
    harness.core.registry.register("Wrapper", Executable::Child(Arc::new(Wrapper))).unwrap();
    let dispatcher = &harness.core.dispatcher;

    let outcome = dispatcher
        .start(&ctx("node-1"), &generic_params("Wrapper"), &StepInputPackage::new())
        .await
        .unwrap();
    assert_eq!(
        suspension(&outcome).request,
        Some(SuspensionRequest::Child {
            child_node_id: "node-1-child".to_string()
        })
    );

    let response = completed(
        dispatcher
            .resume("node-1", "node-1-child", ResponseData::success(json!({ "ok": true })))
            .await
            .unwrap(),
    );
    assert_eq!(response.outputs["attempt"], json!(1));
    assert_eq!(response.outputs["child"], json!({ "ok": true }));
}

#[tokio::test]
async fn test_child_chain_runs_links_in_order() {
    let harness = TestCore::new();
    let chain = Arc::new(Chain::default());
    harness.core.registry.register("Chain", Executable::ChildChain(chain.clone())).unwrap();
    let dispatcher = &harness.core.dispatcher;

    let mut outcome = dispatcher
        .start(&ctx("node-1"), &generic_params("Chain"), &StepInputPackage::new())
        .await
        .unwrap();

    for index in 0..CHAIN_LENGTH {
        let expected = SuspensionRequest::ChildChainLink {
            child_node_id: format!("link-{index}"),
            last_link: index + 1 == CHAIN_LENGTH,
        };
        assert_eq!(suspension(&outcome).request, Some(expected));
        outcome = dispatcher
            .resume("node-1", &format!("link-{index}"), ResponseData::success(json!(index)))
            .await
            .unwrap();
    }

    let response = completed(outcome);
    assert_eq!(response.outputs["last_index"], json!(CHAIN_LENGTH - 1));
    assert_eq!(chain.links_started.load(Ordering::SeqCst), CHAIN_LENGTH as usize);
}

#[tokio::test]
async fn test_child_chain_stops_when_access_is_revoked() {
    let harness = TestCore::new();
    let chain = Arc::new(Chain::default());
    harness.core.registry.register("Chain", Executable::ChildChain(chain.clone())).unwrap();
    let dispatcher = &harness.core.dispatcher;

    dispatcher
        .start(&ctx("node-1"), &generic_params("Chain"), &StepInputPackage::new())
        .await
        .unwrap();
    harness.access.revoke_all(EXECUTOR);

    let response = completed(
        dispatcher
            .resume("node-1", "link-0", ResponseData::success(json!(0)))
            .await
            .unwrap(),
    );
    assert!(response.has_failure_type(FailureType::AuthorizationError));
    assert_eq!(chain.links_started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_children_step_collects_all_children() {
    let harness = TestCore::new();
    harness.core.registry.register("Fanout", Executable::Children(Arc::new(Fanout))).unwrap();
    let dispatcher = &harness.core.dispatcher;

    let outcome = dispatcher
        .start(&ctx("node-1"), &generic_params("Fanout"), &StepInputPackage::new())
        .await
        .unwrap();
    assert_eq!(suspension(&outcome).awaiting.len(), 3);

    for shard in ["shard-3", "shard-1"] {
        let outcome = dispatcher
            .resume("node-1", shard, ResponseData::success(json!(shard)))
            .await
            .unwrap();
        assert!(outcome.is_suspended());
    }
    let response = completed(
        dispatcher
            .resume(
                "node-1",
                "shard-2",
                ResponseData::failure(FailureInfo::new("shard-2 crashed", FailureType::TaskFailure)),
            )
            .await
            .unwrap(),
    );
    assert_eq!(response.failure.unwrap().message, "shard-2 crashed");
}

#[tokio::test]
async fn test_queue_step_completes_in_order() {
    let mut harness = TestCore::new();
    let dispatcher = harness.core.dispatcher.clone();
    let queue: Arc<ResourceConstraintQueue> = harness.core.constraint_queue.clone();
    let params = queue_params("env-prod");

    let first = completed(
        dispatcher
            .start(&ctx("node-a"), &params, &StepInputPackage::new())
            .await
            .unwrap(),
    );
    assert!(first.is_success());
    assert_eq!(first.outputs["consumer_id"], json!("node-a"));

    let second = dispatcher
        .start(&ctx("node-b"), &params, &StepInputPackage::new())
        .await
        .unwrap();
    assert!(second.is_suspended());
    assert!(harness.deliver_pending().await.is_empty());

    let key = ResourceRestraintStep::restraint(&ctx("node-a"), &params)
        .unwrap()
        .constraint_key();
    queue.release(&key, "node-a").await.unwrap();

    let outcomes = harness.deliver_pending().await;
    assert_eq!(outcomes.len(), 1);
    let response = outcomes[0].response().unwrap();
    assert!(response.is_success());
    assert_eq!(response.outputs["consumer_id"], json!("node-b"));
    assert_eq!(queue.current_holders(&key).await.unwrap(), 1);
}

#[tokio::test]
async fn test_aborted_queue_step_leaves_the_lane() {
    let harness = TestCore::new();
    let dispatcher = harness.core.dispatcher.clone();
    let queue = harness.core.constraint_queue.clone();
    let params = queue_params("env-prod");

    dispatcher.start(&ctx("node-a"), &params, &StepInputPackage::new()).await.unwrap();
    dispatcher.start(&ctx("node-b"), &params, &StepInputPackage::new()).await.unwrap();

    let key = ResourceRestraintStep::restraint(&ctx("node-b"), &params)
        .unwrap()
        .constraint_key();
    assert_eq!(queue.waiting(&key).await.unwrap().len(), 1);

    let response = completed(dispatcher.abort("node-b").await.unwrap());
    assert_eq!(response.status, StepStatus::Aborted);
    assert!(queue.waiting(&key).await.unwrap().is_empty());
    assert!(queue.instance(&key, "node-b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_queue_step_aborted_while_enqueueing_frees_its_place() {
    let mut harness = TestCore::new();
    let dispatcher = harness.core.dispatcher.clone();
    let queue = harness.core.constraint_queue.clone();
    let held = Arc::new(HeldQueue {
        inner: ResourceRestraintStep::new(queue.clone()),
        entered: Notify::new(),
        proceed: Notify::new(),
    });
    harness
        .core
        .registry
        .register("HeldQueue", Executable::Async(held.clone()))
        .unwrap();

    let params = queue_params("env-prod");
    let mut held_params = params.clone();
    held_params.step_type = "HeldQueue".to_string();
    let key = ResourceRestraintStep::restraint(&ctx("node-a"), &params)
        .unwrap()
        .constraint_key();

    completed(dispatcher.start(&ctx("node-a"), &params, &StepInputPackage::new()).await.unwrap());

    let running = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .start(&ctx("node-b"), &held_params, &StepInputPackage::new())
                .await
        }
    });
    held.entered.notified().await;
    assert!(queue.instance(&key, "node-b").await.unwrap().unwrap().is_blocked());

    assert_eq!(
        dispatcher.abort("node-b").await.unwrap(),
        DispatchOutcome::AbortRequested
    );
    held.proceed.notify_one();
    let response = completed(running.await.unwrap().unwrap());
    assert_eq!(response.status, StepStatus::Aborted);
    assert!(queue.instance(&key, "node-b").await.unwrap().is_none());

    // The next waiter is not stuck behind the aborted one
    let third = dispatcher
        .start(&ctx("node-c"), &params, &StepInputPackage::new())
        .await
        .unwrap();
    assert!(third.is_suspended());
    queue.release(&key, "node-a").await.unwrap();

    let outcomes = harness.deliver_pending().await;
    assert_eq!(outcomes.len(), 1);
    let promoted = outcomes[0].response().unwrap();
    assert_eq!(promoted.outputs["consumer_id"], json!("node-c"));
}

#[tokio::test]
async fn test_approval_step_reports_rejection() {
    let mut harness = TestCore::new();
    let dispatcher = harness.core.dispatcher.clone();

    let outcome = dispatcher
        .start(
            &ctx("node-1"),
            &approval_params(ApprovalType::ManualApproval, "1d"),
            &StepInputPackage::new(),
        )
        .await
        .unwrap();
    let awaiting = suspension(&outcome).awaiting.clone();
    assert_eq!(awaiting.len(), 1);
    let id = uuid::Uuid::parse_str(&awaiting[0]).unwrap();

    harness
        .core
        .approvals
        .add_approval_activity(id, ApprovalDecision::reject().by("bob"))
        .await
        .unwrap();

    let outcomes = harness.deliver_pending().await;
    let response = outcomes[0].response().unwrap();
    assert_eq!(response.status, StepStatus::ApprovalRejected);
    assert!(response.has_failure_type(FailureType::ApprovalRejection));
}

#[tokio::test]
async fn test_approval_step_expires_through_sweep() {
    let mut harness = TestCore::new();
    let dispatcher = harness.core.dispatcher.clone();

    let outcome = dispatcher
        .start(
            &ctx("node-1"),
            &approval_params(ApprovalType::WebhookApproval, "10m"),
            &StepInputPackage::new(),
        )
        .await
        .unwrap();
    assert!(outcome.is_suspended());

    let later = harness.clock.advance(600_001);
    harness.core.approvals.sweep(later).await.unwrap();

    let outcomes = harness.deliver_pending().await;
    let response = outcomes[0].response().unwrap();
    assert_eq!(response.status, StepStatus::Expired);
}

#[tokio::test]
async fn test_aborting_approval_step_aborts_instance() {
    let harness = TestCore::new();
    let dispatcher = harness.core.dispatcher.clone();

    let outcome = dispatcher
        .start(
            &ctx("node-1"),
            &approval_params(ApprovalType::WebhookApproval, "1h"),
            &StepInputPackage::new(),
        )
        .await
        .unwrap();
    let id = uuid::Uuid::parse_str(&suspension(&outcome).awaiting[0]).unwrap();

    dispatcher.abort("node-1").await.unwrap();
    let instance = harness.core.approvals.get(id).await.unwrap();
    assert_eq!(instance.status, gatekeeper_core::state_machine::ApprovalStatus::Aborted);
}
