//! # Resource Constraint Queue
//!
//! Capacity-bounded admission to named resource lanes. The queue validates
//! restraints, runs lane operations through the [`ConstraintStore`] and tells
//! the orchestrator when a release or cancellation promotes a waiter.
//!
//! `acquire` never fails because of contention: a consumer that cannot be
//! granted now is queued and later woken through the
//! [`OrchestratorCallback`] with the instance id as correlation id.
//!
//! ```rust
//! use gatekeeper_core::config::ConstraintConfig;
//! use gatekeeper_core::constraints::{InMemoryConstraintStore, ResourceConstraintQueue};
//! use gatekeeper_core::events::EventPublisher;
//! use gatekeeper_core::models::{AcquireMode, HoldingScope, ResourceRestraint, ScopeLevel};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let queue = ResourceConstraintQueue::new(
//!     Arc::new(InMemoryConstraintStore::new()),
//!     &ConstraintConfig::default(),
//!     EventPublisher::default(),
//! );
//! let restraint = ResourceRestraint::new(
//!     "Queuing",
//!     "env-prod",
//!     HoldingScope::new(ScopeLevel::Pipeline, "plan-1"),
//!     1,
//!     AcquireMode::Ensure,
//! );
//!
//! assert!(queue.acquire(&restraint, "node-a").await.unwrap().is_granted());
//! assert!(!queue.acquire(&restraint, "node-b").await.unwrap().is_granted());
//!
//! // Releasing the holder promotes the waiter
//! queue.release(&restraint.constraint_key(), "node-a").await.unwrap();
//! assert_eq!(queue.current_holders(&restraint.constraint_key()).await.unwrap(), 1);
//! # });
//! ```

use super::lane::{AcquireOutcome, AcquireRequest, LaneChange, LaneOperation};
use super::store::ConstraintStore;
use crate::config::ConstraintConfig;
use crate::constants::events;
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::events::EventPublisher;
use crate::execution::callback::{CompletionSignal, OrchestratorCallback};
use crate::execution::types::ResponseData;
use crate::logging::log_constraint_operation;
use crate::models::constraint_instance::ResourceConstraintInstance;
use crate::models::resource_restraint::{ConstraintKey, ResourceRestraint};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// Outputs reported to a step once it holds a permit
pub fn grant_outputs(instance: &ResourceConstraintInstance) -> Value {
    json!({
        "constraint_key": instance.constraint_key.as_str(),
        "instance_id": instance.id.to_string(),
        "consumer_id": instance.consumer_id,
        "sequence": instance.sequence,
        "permits": instance.permits,
        "acquire_mode": instance.acquire_mode.to_string(),
        "acquired_at": instance.acquired_at.map(|at| at.to_rfc3339()),
    })
}

#[derive(Debug, Clone)]
pub struct ResourceConstraintQueue {
    store: Arc<dyn ConstraintStore>,
    callback: Option<Arc<dyn OrchestratorCallback>>,
    event_publisher: EventPublisher,
    max_permits: u32,
}

impl ResourceConstraintQueue {
    pub fn new(
        store: Arc<dyn ConstraintStore>,
        config: &ConstraintConfig,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            store,
            callback: None,
            event_publisher,
            max_permits: config.max_permits,
        }
    }

    /// Orchestrator callback notified when a waiter is promoted
    pub fn with_callback(mut self, callback: Arc<dyn OrchestratorCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Acquire a permit for `consumer_id`. Idempotent while the consumer's
    /// instance is BLOCKED or ACTIVE.
    pub async fn acquire(
        &self,
        restraint: &ResourceRestraint,
        consumer_id: &str,
    ) -> GatekeeperResult<AcquireOutcome> {
        self.acquire_with(AcquireRequest::new(restraint.clone(), consumer_id))
            .await
    }

    pub async fn acquire_with(&self, request: AcquireRequest) -> GatekeeperResult<AcquireOutcome> {
        request.restraint.validate()?;
        if request.restraint.permits > self.max_permits {
            return Err(GatekeeperError::InvalidConstraint(format!(
                "constraint '{}' asks for {} permits, the limit is {}",
                request.restraint.name, request.restraint.permits, self.max_permits
            )));
        }
        if request.consumer_id.trim().is_empty() {
            return Err(GatekeeperError::InvalidConstraint(
                "consumer id must not be empty".to_string(),
            ));
        }

        let key = request.restraint.constraint_key();
        let change = self
            .store
            .apply(&key, LaneOperation::Acquire(request))
            .await?;

        let outcome = change.acquire.clone().ok_or_else(|| {
            GatekeeperError::StateMachine(format!("acquire on {key} produced no outcome"))
        })?;

        let instance = outcome.instance();
        log_constraint_operation(
            "acquire",
            key.as_str(),
            &instance.consumer_id,
            &instance.state.to_string(),
            Some(change.active_holders),
        );

        if !change.is_no_op() {
            let event = if outcome.is_granted() {
                events::CONSTRAINT_GRANTED
            } else {
                events::CONSTRAINT_BLOCKED
            };
            self.publish(event, instance).await;
        }

        // A fresh acquire can only promote its own instance, but a lane
        // restored from storage may have had free capacity
        self.notify_promoted(&change).await;

        Ok(outcome)
    }

    /// Finish the consumer's instance and promote waiters. Returns the
    /// finished instance, or `None` when the consumer held nothing.
    pub async fn release(
        &self,
        key: &ConstraintKey,
        consumer_id: &str,
    ) -> GatekeeperResult<Option<ResourceConstraintInstance>> {
        let change = self
            .store
            .apply(
                key,
                LaneOperation::Release {
                    consumer_id: consumer_id.to_string(),
                },
            )
            .await?;
        let finished = self
            .after_finish("release", events::CONSTRAINT_RELEASED, key, consumer_id, change)
            .await;
        Ok(finished.into_iter().next())
    }

    /// Finish every instance tied to `release_entity_id` once its holding
    /// scope (pipeline, stage or group execution) ends, promoting waiters
    /// into the freed capacity. Returns the finished instances.
    pub async fn release_entity(
        &self,
        key: &ConstraintKey,
        release_entity_id: &str,
    ) -> GatekeeperResult<Vec<ResourceConstraintInstance>> {
        let change = self
            .store
            .apply(
                key,
                LaneOperation::ReleaseEntity {
                    release_entity_id: release_entity_id.to_string(),
                },
            )
            .await?;
        Ok(self
            .after_finish(
                "release_entity",
                events::CONSTRAINT_RELEASED,
                key,
                release_entity_id,
                change,
            )
            .await)
    }

    /// Withdraw a consumer: a waiter leaves the queue without promotion, a
    /// holder is released
    pub async fn cancel(
        &self,
        key: &ConstraintKey,
        consumer_id: &str,
    ) -> GatekeeperResult<Option<ResourceConstraintInstance>> {
        let change = self
            .store
            .apply(
                key,
                LaneOperation::Cancel {
                    consumer_id: consumer_id.to_string(),
                },
            )
            .await?;
        let finished = self
            .after_finish("cancel", events::CONSTRAINT_CANCELLED, key, consumer_id, change)
            .await;
        Ok(finished.into_iter().next())
    }

    /// Number of ACTIVE holders of the key
    pub async fn current_holders(&self, key: &ConstraintKey) -> GatekeeperResult<usize> {
        Ok(self
            .store
            .live_instances(key)
            .await?
            .iter()
            .filter(|instance| instance.is_active())
            .count())
    }

    /// Live instance of a consumer, if any
    pub async fn instance(
        &self,
        key: &ConstraintKey,
        consumer_id: &str,
    ) -> GatekeeperResult<Option<ResourceConstraintInstance>> {
        self.store.instance(key, consumer_id).await
    }

    /// BLOCKED instances of the key in grant order (for ENSURE lanes)
    pub async fn waiting(&self, key: &ConstraintKey) -> GatekeeperResult<Vec<ResourceConstraintInstance>> {
        Ok(self
            .store
            .live_instances(key)
            .await?
            .into_iter()
            .filter(|instance| instance.is_blocked())
            .collect())
    }

    async fn after_finish(
        &self,
        operation: &str,
        event: &str,
        key: &ConstraintKey,
        released_by: &str,
        change: LaneChange,
    ) -> Vec<ResourceConstraintInstance> {
        if change.finished.is_empty() {
            debug!(
                constraint_key = %key,
                released_by = %released_by,
                operation = operation,
                "Nothing held - no-op"
            );
            return Vec::new();
        }

        for finished in &change.finished {
            log_constraint_operation(
                operation,
                key.as_str(),
                &finished.consumer_id,
                &finished.state.to_string(),
                Some(change.active_holders),
            );
            self.publish(event, finished).await;
        }
        self.notify_promoted(&change).await;

        change.finished
    }

    async fn notify_promoted(&self, change: &LaneChange) {
        for promoted in &change.promoted {
            log_constraint_operation(
                "promote",
                promoted.constraint_key.as_str(),
                &promoted.consumer_id,
                &promoted.state.to_string(),
                Some(change.active_holders),
            );
            self.publish(events::CONSTRAINT_PROMOTED, promoted).await;

            let Some(callback) = &self.callback else {
                continue;
            };
            let signal = CompletionSignal::new(
                promoted.consumer_id.clone(),
                promoted.id.to_string(),
                ResponseData::success(grant_outputs(promoted)),
            );
            // The grant is already committed; the holder can still be found
            // through `instance` if the notification is lost
            if let Err(err) = callback.notify(signal).await {
                error!(
                    constraint_key = %promoted.constraint_key,
                    consumer_id = %promoted.consumer_id,
                    error = %err,
                    "Failed to notify promoted consumer"
                );
            }
        }
    }

    async fn publish(&self, event: &str, instance: &ResourceConstraintInstance) {
        let context = json!({
            "constraint_key": instance.constraint_key.as_str(),
            "consumer_id": instance.consumer_id,
            "instance_id": instance.id.to_string(),
            "state": instance.state.to_string(),
            "sequence": instance.sequence,
        });
        if let Err(err) = self.event_publisher.publish(event, context).await {
            debug!(error = %err, event = event, "Failed to publish constraint event");
        }
    }
}
