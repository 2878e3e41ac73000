//! Approval instance persistence.
//!
//! Every status change goes through [`ApprovalStore::compare_and_set`]: the
//! write only lands while the stored row is still WAITING at the version the
//! caller read. Two racing resolutions therefore produce exactly one winner.

use crate::error::{GatekeeperError, GatekeeperResult};
use crate::models::approval_instance::ApprovalInstance;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait ApprovalStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, instance: &ApprovalInstance) -> GatekeeperResult<()>;

    async fn get(&self, id: Uuid) -> GatekeeperResult<Option<ApprovalInstance>>;

    /// Replace the stored instance with `updated` if it is still WAITING at
    /// `expected_version`. Returns false when another writer got there first.
    async fn compare_and_set(
        &self,
        expected_version: i64,
        updated: &ApprovalInstance,
    ) -> GatekeeperResult<bool>;

    /// WAITING instances whose `next_iteration <= now`, oldest first
    async fn due_for_iteration(&self, now: i64, limit: usize) -> GatekeeperResult<Vec<ApprovalInstance>>;

    /// Move the next sweep visit of a WAITING instance
    async fn reschedule(&self, id: Uuid, next_iteration: i64) -> GatekeeperResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryApprovalStore {
    instances: DashMap<Uuid, ApprovalInstance>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, instance: &ApprovalInstance) -> GatekeeperResult<()> {
        if self.instances.contains_key(&instance.id) {
            return Err(GatekeeperError::Persistence(format!(
                "approval instance {} already exists",
                instance.id
            )));
        }
        self.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> GatekeeperResult<Option<ApprovalInstance>> {
        Ok(self.instances.get(&id).map(|entry| entry.value().clone()))
    }

    async fn compare_and_set(
        &self,
        expected_version: i64,
        updated: &ApprovalInstance,
    ) -> GatekeeperResult<bool> {
        let Some(mut stored) = self.instances.get_mut(&updated.id) else {
            return Err(GatekeeperError::ApprovalNotFound(updated.id));
        };
        if !stored.is_waiting() || stored.version != expected_version {
            return Ok(false);
        }
        *stored = updated.clone();
        Ok(true)
    }

    async fn due_for_iteration(&self, now: i64, limit: usize) -> GatekeeperResult<Vec<ApprovalInstance>> {
        let mut due: Vec<ApprovalInstance> = self
            .instances
            .iter()
            .filter(|entry| entry.is_waiting() && entry.next_iteration <= now)
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|instance| (instance.next_iteration, instance.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn reschedule(&self, id: Uuid, next_iteration: i64) -> GatekeeperResult<()> {
        if let Some(mut stored) = self.instances.get_mut(&id) {
            if stored.is_waiting() {
                stored.next_iteration = next_iteration;
            }
        }
        Ok(())
    }
}
