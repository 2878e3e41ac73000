//! Builders for execution contexts, step parameters and a wired core.

use gatekeeper_core::authorization::StaticAccessControlClient;
use gatekeeper_core::bootstrap::{CoreStores, GatekeeperCore};
use gatekeeper_core::config::{ConfigManager, GatekeeperConfig};
use gatekeeper_core::constants::step_types;
use gatekeeper_core::execution::{ChannelCallback, CompletionSignal};
use gatekeeper_core::models::{
    AcquireMode, ApprovalSpec, ApprovalType, ApproverSpec, EntityReference, ExecutionContext,
    ExecutionPrincipal, ResourceRestraintSpec, ResourceScope, ResourceType, ScopeLevel,
    StepParameters, StepSpec,
};
use gatekeeper_core::utils::ManualClock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub const ACCOUNT: &str = "acc-1";
pub const ORG: &str = "org-1";
pub const PROJECT: &str = "proj-1";
pub const PLAN: &str = "plan-1";
pub const EXECUTOR: &str = "alice";
pub const T0: i64 = 1_700_000_000_000;

pub fn project_scope() -> ResourceScope {
    ResourceScope::project(ACCOUNT, ORG, PROJECT)
}

/// Context for a node run by `alice` inside plan `plan-1`
pub fn ctx(node_execution_id: &str) -> ExecutionContext {
    ExecutionContext::new(ACCOUNT, ORG, PROJECT, "deploy-pipeline", PLAN, node_execution_id)
        .with_stage_execution("stage-1")
        .with_principal(ExecutionPrincipal::user(EXECUTOR))
}

pub fn ctx_in_plan(node_execution_id: &str, plan_execution_id: &str) -> ExecutionContext {
    ExecutionContext::new(
        ACCOUNT,
        ORG,
        PROJECT,
        "deploy-pipeline",
        plan_execution_id,
        node_execution_id,
    )
    .with_principal(ExecutionPrincipal::user(EXECUTOR))
}

pub fn environment_ref(identifier: &str) -> EntityReference {
    EntityReference::new(ResourceType::Environment, identifier, project_scope())
}

/// Queue step on `resource_unit`, pipeline scoped, one permit
pub fn queue_params(resource_unit: &str) -> StepParameters {
    restraint_params(resource_unit, 1, AcquireMode::Ensure, ScopeLevel::Pipeline)
}

pub fn restraint_params(
    resource_unit: &str,
    permits: u32,
    acquire_mode: AcquireMode,
    scope: ScopeLevel,
) -> StepParameters {
    StepParameters::new(
        "wait_for_env",
        step_types::QUEUE,
        StepSpec::ResourceRestraint(ResourceRestraintSpec {
            name: "Queuing".to_string(),
            resource_unit: resource_unit.to_string(),
            scope,
            group: None,
            permits,
            acquire_mode,
        }),
    )
}

pub fn approval_params(approval_type: ApprovalType, timeout: &str) -> StepParameters {
    let step_type = match approval_type {
        ApprovalType::ManualApproval => step_types::HARNESS_APPROVAL,
        ApprovalType::WebhookApproval => step_types::WEBHOOK_APPROVAL,
    };
    StepParameters::new(
        "approve_release",
        step_type,
        StepSpec::Approval(ApprovalSpec {
            approval_type,
            approvers: match approval_type {
                ApprovalType::ManualApproval => Some(ApproverSpec {
                    user_groups: vec!["release-managers".to_string()],
                    minimum_count: 1,
                    disallow_pipeline_executor: false,
                }),
                ApprovalType::WebhookApproval => None,
            },
            message: Some("Ship it?".to_string()),
        }),
    )
    .with_timeout(timeout)
}

/// A core over in-memory stores with a manual clock and a channel callback
pub struct TestCore {
    pub core: GatekeeperCore,
    pub access: Arc<StaticAccessControlClient>,
    pub clock: Arc<ManualClock>,
    pub signals: UnboundedReceiver<CompletionSignal>,
}

impl TestCore {
    pub fn new() -> Self {
        Self::with_config(GatekeeperConfig::default())
    }

    pub fn with_config(config: GatekeeperConfig) -> Self {
        let access = Arc::new(
            StaticAccessControlClient::new()
                .with_grant(EXECUTOR, "core_environment_access", ResourceScope::account(ACCOUNT)),
        );
        let clock = Arc::new(ManualClock::new(T0));
        let (callback, signals) = ChannelCallback::channel();
        let config_manager = ConfigManager::from_config(config, "test").expect("valid config");

        let core = GatekeeperCore::from_parts(
            config_manager,
            CoreStores::in_memory(),
            access.clone(),
            Arc::new(callback),
            clock.clone(),
        )
        .expect("core wires up");

        Self {
            core,
            access,
            clock,
            signals,
        }
    }

    /// Next signal emitted by the queue or the approval service
    pub async fn next_signal(&mut self) -> CompletionSignal {
        tokio::time::timeout(std::time::Duration::from_secs(1), self.signals.recv())
            .await
            .expect("signal within a second")
            .expect("callback channel open")
    }

    /// Route every pending signal back into the dispatcher
    pub async fn deliver_pending(&mut self) -> Vec<gatekeeper_core::DispatchOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(signal) = self.signals.try_recv() {
            outcomes.push(
                self.core
                    .dispatcher
                    .resume(&signal.node_execution_id, &signal.correlation_id, signal.payload)
                    .await
                    .expect("resume succeeds"),
            );
        }
        outcomes
    }
}
