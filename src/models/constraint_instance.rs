//! # Resource Constraint Instances
//!
//! One waiter/holder record in a constraint lane. An instance is created
//! BLOCKED by `acquire`, promoted to ACTIVE when the lane has capacity (and,
//! in ENSURE mode, when it is the oldest waiter) and moved to FINISHED on
//! release or cancellation.
//!
//! `sequence` is the per-lane enqueue number. It is assigned inside the
//! lane's critical section, so two instances of one lane never share a value
//! and the order survives clock skew between callers.

use crate::models::resource_restraint::{AcquireMode, ConstraintKey};
use crate::state_machine::ConsumerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConstraintInstance {
    /// Correlation id used when the holder is notified of a grant
    pub id: Uuid,
    pub constraint_key: ConstraintKey,
    /// Node execution id of the requesting step
    pub consumer_id: String,
    pub sequence: i64,
    pub state: ConsumerState,
    pub permits: u32,
    pub acquire_mode: AcquireMode,
    /// Execution (plan or stage) whose completion releases this instance
    pub release_entity_id: String,
    pub plan_execution_id: String,
    pub created_at: DateTime<Utc>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ResourceConstraintInstance {
    pub fn is_active(&self) -> bool {
        self.state == ConsumerState::Active
    }

    pub fn is_blocked(&self) -> bool {
        self.state == ConsumerState::Blocked
    }

    /// Live instances count towards the lane (blocked waiters or holders)
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }
}
