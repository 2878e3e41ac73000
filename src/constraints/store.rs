//! Persistence seam for constraint lanes.

use super::lane::{Lane, LaneChange, LaneOperation};
use crate::error::GatekeeperResult;
use crate::models::constraint_instance::ResourceConstraintInstance;
use crate::models::resource_restraint::ConstraintKey;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Storage for constraint lanes. `apply` must run the operation atomically
/// with respect to every other operation on the same key.
#[async_trait]
pub trait ConstraintStore: Send + Sync + std::fmt::Debug {
    async fn apply(&self, key: &ConstraintKey, operation: LaneOperation) -> GatekeeperResult<LaneChange>;

    /// BLOCKED and ACTIVE instances of the key in sequence order
    async fn live_instances(&self, key: &ConstraintKey) -> GatekeeperResult<Vec<ResourceConstraintInstance>>;

    async fn instance(
        &self,
        key: &ConstraintKey,
        consumer_id: &str,
    ) -> GatekeeperResult<Option<ResourceConstraintInstance>>;
}

#[derive(Debug)]
struct LaneSlot {
    lane: Lane,
    /// Set once the idle lane has been dropped from the map
    retired: bool,
}

type SharedLane = Arc<Mutex<LaneSlot>>;

/// Process-local store: one mutex per lane, lanes kept in a concurrent map.
///
/// A lane is removed as soon as an operation leaves it idle, so the map only
/// holds keys with BLOCKED or ACTIVE consumers. Sequences of a key restart
/// once its lane is dropped; ordering only matters among live instances.
#[derive(Debug, Default)]
pub struct InMemoryConstraintStore {
    lanes: DashMap<ConstraintKey, SharedLane>,
}

impl InMemoryConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, key: &ConstraintKey) -> SharedLane {
        self.lanes
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(LaneSlot {
                    lane: Lane::new(key.clone()),
                    retired: false,
                }))
            })
            .clone()
    }

    fn existing_lane(&self, key: &ConstraintKey) -> Option<SharedLane> {
        self.lanes.get(key).map(|lane| lane.clone())
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

#[async_trait]
impl ConstraintStore for InMemoryConstraintStore {
    async fn apply(&self, key: &ConstraintKey, operation: LaneOperation) -> GatekeeperResult<LaneChange> {
        loop {
            // Only an acquire may bring a lane into existence
            let shared = match &operation {
                LaneOperation::Acquire(_) => self.lane(key),
                _ => match self.existing_lane(key) {
                    Some(shared) => shared,
                    None => return Ok(LaneChange::default()),
                },
            };

            let mut slot = shared.lock();
            if slot.retired {
                // Dropped while this caller waited on the lock
                continue;
            }

            let result = slot.lane.apply(operation, Utc::now());
            if slot.lane.is_idle() {
                slot.retired = true;
                self.lanes
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &shared));
            }
            return result;
        }
    }

    async fn live_instances(&self, key: &ConstraintKey) -> GatekeeperResult<Vec<ResourceConstraintInstance>> {
        Ok(self
            .existing_lane(key)
            .map(|shared| shared.lock().lane.live().to_vec())
            .unwrap_or_default())
    }

    async fn instance(
        &self,
        key: &ConstraintKey,
        consumer_id: &str,
    ) -> GatekeeperResult<Option<ResourceConstraintInstance>> {
        Ok(self
            .existing_lane(key)
            .and_then(|shared| shared.lock().lane.instance(consumer_id).cloned()))
    }
}
