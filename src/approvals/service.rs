//! # Approval Service
//!
//! Creates approval instances for suspended approval steps and drives them
//! through the approval state machine.
//!
//! ## Resolution paths
//!
//! - `resolve`: one decisive approve/reject (webhook approvals, admin override)
//! - `add_approval_activity`: a vote on a manual approval; a reject or the
//!   `minimum_count`-th approve decides it
//! - `abort` / `fail`: owning step aborted, unrecoverable error
//! - `sweep`: deadline passed without a decision
//!
//! Every write is a compare-and-set on the version read, so a decision racing
//! the sweep produces exactly one terminal status. Terminal statuses other
//! than ABORTED are reported to the orchestrator callback using the
//! instance's `callback_id` as correlation id.

use super::store::ApprovalStore;
use super::timeout::compute_deadline;
use crate::config::ApprovalConfig;
use crate::constants::events;
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::events::EventPublisher;
use crate::execution::callback::{CompletionSignal, OrchestratorCallback};
use crate::execution::types::ResponseData;
use crate::logging::log_approval_operation;
use crate::models::approval_instance::{
    ApprovalAction, ApprovalActivity, ApprovalDecision, ApprovalInstance, ApprovalType,
};
use crate::models::execution_context::ExecutionContext;
use crate::models::failure::{FailureInfo, FailureType};
use crate::models::step_parameters::StepParameters;
use crate::state_machine::{ApprovalEvent, ApprovalStateMachine, ApprovalStatus};
use crate::utils::clock::{Clock, SystemClock};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bound on compare-and-set retries for one operation
const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Result of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub rescheduled: usize,
}

/// Payload delivered to the suspended step when an instance reaches `status`.
/// ABORTED and WAITING produce nothing.
pub fn completion_payload(instance: &ApprovalInstance) -> Option<ResponseData> {
    let outputs = instance.summary_outputs();
    match instance.status {
        ApprovalStatus::Approved => Some(ResponseData::success(outputs)),
        ApprovalStatus::Rejected => Some(ResponseData::failure_with_outputs(
            FailureInfo::new("Approval rejected", FailureType::ApprovalRejection),
            outputs,
        )),
        ApprovalStatus::Expired => Some(ResponseData::failure_with_outputs(
            FailureInfo::new(
                format!("Approval expired at deadline {}", instance.deadline),
                FailureType::ApprovalExpired,
            ),
            outputs,
        )),
        ApprovalStatus::Failed => Some(ResponseData::failure_with_outputs(
            FailureInfo::new(
                instance
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Approval failed".to_string()),
                FailureType::ApplicationError,
            ),
            outputs,
        )),
        ApprovalStatus::Waiting | ApprovalStatus::Aborted => None,
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    callback: Option<Arc<dyn OrchestratorCallback>>,
    event_publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    config: ApprovalConfig,
}

impl ApprovalService {
    pub fn new(store: Arc<dyn ApprovalStore>, config: &ApprovalConfig, event_publisher: EventPublisher) -> Self {
        Self {
            store,
            callback: None,
            event_publisher,
            clock: Arc::new(SystemClock),
            config: config.clone(),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn OrchestratorCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Create a WAITING instance for the approval step described by `params`
    pub async fn create(
        &self,
        ctx: &ExecutionContext,
        params: &StepParameters,
    ) -> GatekeeperResult<ApprovalInstance> {
        let spec = params.approval_spec().ok_or_else(|| {
            GatekeeperError::InvalidParameters(format!(
                "step '{}' carries no approval spec",
                params.identifier
            ))
        })?;

        let now = self.clock.now_millis();
        let deadline = compute_deadline(now, params.timeout.as_ref(), &self.config.default_timeout)?;
        let id = Uuid::new_v4();

        let approvers = match spec.approval_type {
            ApprovalType::ManualApproval => Some(spec.approvers.clone().unwrap_or_default()),
            ApprovalType::WebhookApproval => None,
        };

        let instance = ApprovalInstance {
            id,
            approval_type: spec.approval_type,
            status: ApprovalStatus::Waiting,
            deadline,
            created_at: now,
            last_modified_at: now,
            next_iteration: self.next_iteration(now, deadline),
            account_id: ctx.account_id.clone(),
            org_identifier: ctx.org_id.clone(),
            project_identifier: ctx.project_id.clone(),
            pipeline_identifier: ctx.pipeline_id.clone(),
            plan_execution_id: ctx.plan_execution_id.clone(),
            node_execution_id: ctx.node_execution_id.clone(),
            callback_id: id.to_string(),
            triggered_by: ctx.principal.as_ref().map(|p| p.principal_id.clone()),
            approvers,
            activities: Vec::new(),
            error_message: None,
            version: 0,
        };

        self.store.insert(&instance).await?;

        log_approval_operation(
            "create",
            &instance.id.to_string(),
            &instance.node_execution_id,
            &instance.status.to_string(),
            Some(&format!("deadline={}", instance.deadline)),
        );
        self.publish(events::APPROVAL_CREATED, &instance).await;

        Ok(instance)
    }

    pub async fn get(&self, id: Uuid) -> GatekeeperResult<ApprovalInstance> {
        self.store
            .get(id)
            .await?
            .ok_or(GatekeeperError::ApprovalNotFound(id))
    }

    /// Decide an instance: WAITING to APPROVED or REJECTED. A decision that
    /// arrives after the deadline expires the instance instead and reports
    /// `AlreadyResolved`.
    pub async fn resolve(&self, id: Uuid, decision: ApprovalDecision) -> GatekeeperResult<ApprovalInstance> {
        let event = ApprovalEvent::from(decision.action);
        self.transition(id, event, true, |instance, now| {
            if let Some(approver) = &decision.decided_by {
                instance.activities.push(ApprovalActivity {
                    approver: approver.clone(),
                    action: decision.action,
                    comments: decision.comments.clone(),
                    recorded_at: now,
                });
            }
        })
        .await
    }

    /// Record one vote on a manual approval. A reject decides the instance
    /// immediately; approvals decide it once `minimum_count` is reached.
    pub async fn add_approval_activity(
        &self,
        id: Uuid,
        decision: ApprovalDecision,
    ) -> GatekeeperResult<ApprovalInstance> {
        let approver = decision.decided_by.clone().ok_or_else(|| {
            GatekeeperError::ApprovalNotPermitted("an approval activity needs an approver".to_string())
        })?;

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.get(id).await?;
            if !current.is_waiting() {
                return Err(GatekeeperError::AlreadyResolved {
                    id,
                    status: current.status,
                });
            }

            let now = self.clock.now_millis();
            if current.has_expired(now) {
                self.expire_instance(&current, now).await?;
                continue;
            }

            if current.approval_type != ApprovalType::ManualApproval {
                return Err(GatekeeperError::ApprovalNotPermitted(format!(
                    "{} instances take a single decision",
                    current.approval_type
                )));
            }
            if current.has_vote_from(&approver) {
                return Err(GatekeeperError::ApprovalNotPermitted(format!(
                    "'{approver}' has already voted on approval {id}"
                )));
            }
            let executor_disallowed = current
                .approvers
                .as_ref()
                .map(|spec| spec.disallow_pipeline_executor)
                .unwrap_or(false);
            if executor_disallowed && current.triggered_by.as_deref() == Some(approver.as_str()) {
                return Err(GatekeeperError::ApprovalNotPermitted(format!(
                    "'{approver}' triggered the pipeline and may not approve it"
                )));
            }

            let mut updated = current.clone();
            updated.activities.push(ApprovalActivity {
                approver: approver.clone(),
                action: decision.action,
                comments: decision.comments.clone(),
                recorded_at: now,
            });
            updated.last_modified_at = now;
            updated.version += 1;

            let decisive = match decision.action {
                ApprovalAction::Reject => Some(ApprovalEvent::Reject),
                ApprovalAction::Approve
                    if updated.approval_count() >= updated.minimum_approvals() as usize =>
                {
                    Some(ApprovalEvent::Approve)
                }
                ApprovalAction::Approve => None,
            };
            if let Some(event) = &decisive {
                updated.status = ApprovalStateMachine::determine_target_state(current.status, event)?;
            }

            if !self.store.compare_and_set(current.version, &updated).await? {
                debug!(approval_id = %id, "Concurrent approval update, retrying vote");
                continue;
            }

            if decisive.is_some() {
                self.on_transition(&updated).await;
            } else {
                log_approval_operation(
                    "add_activity",
                    &updated.id.to_string(),
                    &updated.node_execution_id,
                    &updated.status.to_string(),
                    Some(&format!(
                        "approvals={}/{}",
                        updated.approval_count(),
                        updated.minimum_approvals()
                    )),
                );
                self.publish(events::APPROVAL_ACTIVITY_RECORDED, &updated).await;
            }
            return Ok(updated);
        }

        Err(self.contention(id))
    }

    /// WAITING to ABORTED. The owning step is being aborted, so no signal is
    /// sent.
    pub async fn abort(&self, id: Uuid) -> GatekeeperResult<ApprovalInstance> {
        self.transition(id, ApprovalEvent::Abort, false, |_, _| {}).await
    }

    /// WAITING to FAILED, reported to the step as an application error
    pub async fn fail(&self, id: Uuid, message: impl Into<String>) -> GatekeeperResult<ApprovalInstance> {
        let event = ApprovalEvent::fail_with_error(message);
        let message = event.error_message().map(str::to_string);
        self.transition(id, event, false, move |instance, _| {
            instance.error_message = message.clone();
        })
        .await
    }

    /// Expire every due WAITING instance whose deadline has passed and push
    /// the rest to their next visit
    pub async fn sweep(&self, now: i64) -> GatekeeperResult<SweepReport> {
        let batch_size = self.config.sweep_batch_size.max(1);
        let mut report = SweepReport::default();

        loop {
            let due = self.store.due_for_iteration(now, batch_size).await?;
            let page_len = due.len();
            let mut progressed = 0;

            for instance in due {
                report.scanned += 1;
                if instance.has_expired(now) {
                    if self.expire_instance(&instance, now).await?.is_some() {
                        report.expired += 1;
                        progressed += 1;
                    }
                } else {
                    self.store
                        .reschedule(instance.id, self.next_iteration(now, instance.deadline))
                        .await?;
                    report.rescheduled += 1;
                    progressed += 1;
                }
            }

            if page_len < batch_size || progressed == 0 {
                break;
            }
        }

        if report.expired > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                rescheduled = report.rescheduled,
                "Approval sweep expired instances"
            );
        } else {
            debug!(
                scanned = report.scanned,
                rescheduled = report.rescheduled,
                "Approval sweep found nothing to expire"
            );
        }

        Ok(report)
    }

    /// Sweep visits a WAITING instance every iteration interval, and once
    /// more just after its deadline
    fn next_iteration(&self, now: i64, deadline: i64) -> i64 {
        now.saturating_add(self.config.iteration_interval_ms)
            .min(deadline.saturating_add(1))
    }

    /// Force EXPIRED. Returns `None` when another writer changed the
    /// instance first.
    async fn expire_instance(
        &self,
        current: &ApprovalInstance,
        now: i64,
    ) -> GatekeeperResult<Option<ApprovalInstance>> {
        let status = ApprovalStateMachine::determine_target_state(current.status, &ApprovalEvent::Expire)?;
        let mut updated = current.clone();
        updated.status = status;
        updated.last_modified_at = now;
        updated.version += 1;

        if !self.store.compare_and_set(current.version, &updated).await? {
            debug!(approval_id = %current.id, "Instance changed before it could expire");
            return Ok(None);
        }

        self.on_transition(&updated).await;
        Ok(Some(updated))
    }

    async fn transition<F>(
        &self,
        id: Uuid,
        event: ApprovalEvent,
        enforce_deadline: bool,
        mutate: F,
    ) -> GatekeeperResult<ApprovalInstance>
    where
        F: Fn(&mut ApprovalInstance, i64) + Send + Sync,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.get(id).await?;
            if !current.is_waiting() {
                return Err(GatekeeperError::AlreadyResolved {
                    id,
                    status: current.status,
                });
            }

            let now = self.clock.now_millis();
            if enforce_deadline && current.has_expired(now) {
                self.expire_instance(&current, now).await?;
                continue;
            }

            let mut updated = current.clone();
            updated.status = ApprovalStateMachine::determine_target_state(current.status, &event)?;
            updated.last_modified_at = now;
            updated.version += 1;
            mutate(&mut updated, now);

            if self.store.compare_and_set(current.version, &updated).await? {
                self.on_transition(&updated).await;
                return Ok(updated);
            }
            debug!(
                approval_id = %id,
                event = event.event_type(),
                "Concurrent approval update, retrying"
            );
        }

        Err(self.contention(id))
    }

    async fn on_transition(&self, instance: &ApprovalInstance) {
        let (operation, event) = match instance.status {
            ApprovalStatus::Approved => ("approve", events::APPROVAL_APPROVED),
            ApprovalStatus::Rejected => ("reject", events::APPROVAL_REJECTED),
            ApprovalStatus::Expired => ("expire", events::APPROVAL_EXPIRED),
            ApprovalStatus::Aborted => ("abort", events::APPROVAL_ABORTED),
            ApprovalStatus::Failed => ("fail", events::APPROVAL_FAILED),
            ApprovalStatus::Waiting => return,
        };

        log_approval_operation(
            operation,
            &instance.id.to_string(),
            &instance.node_execution_id,
            &instance.status.to_string(),
            instance.error_message.as_deref(),
        );
        self.publish(event, instance).await;

        let (Some(callback), Some(payload)) = (&self.callback, completion_payload(instance)) else {
            return;
        };
        let signal = CompletionSignal::new(
            instance.node_execution_id.clone(),
            instance.callback_id.clone(),
            payload,
        );
        // The status change is committed; a lost signal leaves the step
        // waiting until the orchestrator re-reads the instance
        if let Err(err) = callback.notify(signal).await {
            error!(
                approval_id = %instance.id,
                node_execution_id = %instance.node_execution_id,
                error = %err,
                "Failed to notify orchestrator of approval outcome"
            );
        }
    }

    async fn publish(&self, event: &str, instance: &ApprovalInstance) {
        let context = json!({
            "approval_id": instance.id.to_string(),
            "approval_type": instance.approval_type.to_string(),
            "node_execution_id": instance.node_execution_id,
            "plan_execution_id": instance.plan_execution_id,
            "status": instance.status.to_string(),
            "deadline": instance.deadline,
        });
        if let Err(err) = self.event_publisher.publish(event, context).await {
            debug!(error = %err, event = event, "Failed to publish approval event");
        }
    }

    fn contention(&self, id: Uuid) -> GatekeeperError {
        warn!(approval_id = %id, attempts = MAX_UPDATE_ATTEMPTS, "Approval update kept conflicting");
        GatekeeperError::Persistence(format!(
            "approval instance {id} kept changing after {MAX_UPDATE_ATTEMPTS} attempts"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::store::InMemoryApprovalStore;
    use crate::execution::callback::ChannelCallback;
    use crate::models::approval_instance::ApproverSpec;
    use crate::models::execution_context::ExecutionPrincipal;
    use crate::models::step_parameters::{ApprovalSpec, StepSpec};
    use crate::utils::clock::ManualClock;

    const T0: i64 = 1_700_000_000_000;

    fn service(clock: Arc<ManualClock>) -> (ApprovalService, tokio::sync::mpsc::UnboundedReceiver<CompletionSignal>) {
        let (callback, receiver) = ChannelCallback::channel();
        let service = ApprovalService::new(
            Arc::new(InMemoryApprovalStore::new()),
            &ApprovalConfig::default(),
            EventPublisher::default(),
        )
        .with_clock(clock)
        .with_callback(Arc::new(callback));
        (service, receiver)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("acc", "org", "proj", "pipe", "plan-1", "node-1")
            .with_principal(ExecutionPrincipal::user("alice"))
    }

    fn manual(minimum_count: u32, disallow_executor: bool) -> StepParameters {
        StepParameters::new(
            "approve",
            "HarnessApproval",
            StepSpec::Approval(ApprovalSpec {
                approval_type: ApprovalType::ManualApproval,
                approvers: Some(ApproverSpec {
                    user_groups: vec!["release-managers".to_string()],
                    minimum_count,
                    disallow_pipeline_executor: disallow_executor,
                }),
                message: None,
            }),
        )
        .with_timeout("10m")
    }

    #[tokio::test]
    async fn test_create_uses_declared_timeout() {
        let clock = Arc::new(ManualClock::new(T0));
        let (service, _signals) = service(clock);
        let instance = service.create(&ctx(), &manual(1, false)).await.unwrap();

        assert_eq!(instance.status, ApprovalStatus::Waiting);
        assert_eq!(instance.deadline, T0 + 600_000);
        assert_eq!(instance.next_iteration, T0 + 60_000);
        assert_eq!(instance.triggered_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_votes_reach_minimum_count() {
        let clock = Arc::new(ManualClock::new(T0));
        let (service, mut signals) = service(clock);
        let instance = service.create(&ctx(), &manual(2, false)).await.unwrap();

        let after_one = service
            .add_approval_activity(instance.id, ApprovalDecision::approve().by("bob"))
            .await
            .unwrap();
        assert_eq!(after_one.status, ApprovalStatus::Waiting);
        assert!(signals.try_recv().is_err());

        let duplicate = service
            .add_approval_activity(instance.id, ApprovalDecision::approve().by("bob"))
            .await;
        assert!(matches!(duplicate, Err(GatekeeperError::ApprovalNotPermitted(_))));

        let decided = service
            .add_approval_activity(instance.id, ApprovalDecision::approve().by("carol"))
            .await
            .unwrap();
        assert_eq!(decided.status, ApprovalStatus::Approved);

        let signal = signals.recv().await.unwrap();
        assert_eq!(signal.correlation_id, instance.callback_id);
        assert!(signal.payload.is_success());
    }

    #[tokio::test]
    async fn test_executor_self_approval_refused_when_disallowed() {
        let clock = Arc::new(ManualClock::new(T0));
        let (service, _signals) = service(clock);
        let instance = service.create(&ctx(), &manual(1, true)).await.unwrap();

        let err = service
            .add_approval_activity(instance.id, ApprovalDecision::approve().by("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::ApprovalNotPermitted(_)));
    }

    #[tokio::test]
    async fn test_resolve_after_deadline_expires() {
        let clock = Arc::new(ManualClock::new(T0));
        let (service, mut signals) = service(clock.clone());
        let instance = service.create(&ctx(), &manual(1, false)).await.unwrap();

        clock.set(instance.deadline + 1);
        let err = service
            .resolve(instance.id, ApprovalDecision::approve())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatekeeperError::AlreadyResolved {
                id: instance.id,
                status: ApprovalStatus::Expired
            }
        );

        let signal = signals.recv().await.unwrap();
        let failure = signal.payload.failure_info().unwrap();
        assert!(failure.has_type(FailureType::ApprovalExpired));
    }

    #[tokio::test]
    async fn test_abort_sends_no_signal() {
        let clock = Arc::new(ManualClock::new(T0));
        let (service, mut signals) = service(clock);
        let instance = service.create(&ctx(), &manual(1, false)).await.unwrap();

        let aborted = service.abort(instance.id).await.unwrap();
        assert_eq!(aborted.status, ApprovalStatus::Aborted);
        assert!(signals.try_recv().is_err());
        assert!(service.abort(instance.id).await.unwrap_err().is_no_op());
    }
}
