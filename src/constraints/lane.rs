//! # Constraint Lane
//!
//! Admission algorithm for one constraint key. A [`Lane`] holds the live
//! (BLOCKED or ACTIVE) instances of the key ordered by sequence, and every
//! operation returns a [`LaneChange`] listing the instances it wrote so a
//! store can persist exactly those rows.
//!
//! The lane itself does no locking. Stores run each operation inside a
//! key-scoped critical section, which makes acquire, release and cancel
//! atomic per key.

use crate::error::{GatekeeperError, GatekeeperResult};
use crate::models::constraint_instance::ResourceConstraintInstance;
use crate::models::resource_restraint::{AcquireMode, ConstraintKey, ResourceRestraint};
use crate::state_machine::ConsumerState;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Result of an acquire request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The consumer holds a permit
    Granted(ResourceConstraintInstance),
    /// The consumer is queued and will be notified on promotion
    Pending(ResourceConstraintInstance),
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    pub fn instance(&self) -> &ResourceConstraintInstance {
        match self {
            Self::Granted(instance) | Self::Pending(instance) => instance,
        }
    }

    fn for_instance(instance: &ResourceConstraintInstance) -> Self {
        if instance.is_active() {
            Self::Granted(instance.clone())
        } else {
            Self::Pending(instance.clone())
        }
    }
}

/// Everything needed to enqueue one consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub restraint: ResourceRestraint,
    pub consumer_id: String,
    pub release_entity_id: String,
    pub plan_execution_id: String,
}

impl AcquireRequest {
    /// Request whose holder is released by its own consumer id
    pub fn new(restraint: ResourceRestraint, consumer_id: impl Into<String>) -> Self {
        let consumer_id = consumer_id.into();
        Self {
            restraint,
            release_entity_id: consumer_id.clone(),
            plan_execution_id: consumer_id.clone(),
            consumer_id,
        }
    }

    pub fn with_release_entity(mut self, release_entity_id: impl Into<String>) -> Self {
        self.release_entity_id = release_entity_id.into();
        self
    }

    pub fn with_plan_execution(mut self, plan_execution_id: impl Into<String>) -> Self {
        self.plan_execution_id = plan_execution_id.into();
        self
    }
}

/// Operation applied to a lane inside its critical section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneOperation {
    Acquire(AcquireRequest),
    Release { consumer_id: String },
    Cancel { consumer_id: String },
    /// The holding scope of a release entity ended
    ReleaseEntity { release_entity_id: String },
}

impl LaneOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Acquire(_) => "acquire",
            Self::Release { .. } => "release",
            Self::Cancel { .. } => "cancel",
            Self::ReleaseEntity { .. } => "release_entity",
        }
    }
}

/// What an operation did to the lane
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneChange {
    /// Set for acquire operations
    pub acquire: Option<AcquireOutcome>,
    /// Instances finished by a release or cancel
    pub finished: Vec<ResourceConstraintInstance>,
    /// Waiters promoted to ACTIVE by this operation
    pub promoted: Vec<ResourceConstraintInstance>,
    /// Every instance inserted or updated, in write order
    pub written: Vec<ResourceConstraintInstance>,
    /// ACTIVE count after the operation
    pub active_holders: usize,
}

impl LaneChange {
    /// True when the operation changed nothing (idempotent repeat)
    pub fn is_no_op(&self) -> bool {
        self.written.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Lane {
    key: ConstraintKey,
    next_sequence: i64,
    live: Vec<ResourceConstraintInstance>,
}

impl Lane {
    pub fn new(key: ConstraintKey) -> Self {
        Self {
            key,
            next_sequence: 1,
            live: Vec::new(),
        }
    }

    /// Rebuild a lane from persisted live instances. `next_sequence` must be
    /// greater than every sequence ever handed out for the key.
    pub fn restore(
        key: ConstraintKey,
        mut live: Vec<ResourceConstraintInstance>,
        next_sequence: i64,
    ) -> Self {
        live.retain(|instance| instance.is_live());
        live.sort_by_key(|instance| instance.sequence);
        let floor = live.last().map(|i| i.sequence + 1).unwrap_or(1);
        Self {
            key,
            next_sequence: next_sequence.max(floor),
            live,
        }
    }

    pub fn key(&self) -> &ConstraintKey {
        &self.key
    }

    pub fn next_sequence(&self) -> i64 {
        self.next_sequence
    }

    /// Capacity fixed by the oldest live consumer
    pub fn permits(&self) -> Option<u32> {
        self.live.first().map(|instance| instance.permits)
    }

    pub fn mode(&self) -> Option<AcquireMode> {
        self.live.first().map(|instance| instance.acquire_mode)
    }

    pub fn active_count(&self) -> usize {
        self.live.iter().filter(|i| i.is_active()).count()
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    pub fn live(&self) -> &[ResourceConstraintInstance] {
        &self.live
    }

    /// BLOCKED instances in sequence order
    pub fn waiting(&self) -> Vec<ResourceConstraintInstance> {
        self.live.iter().filter(|i| i.is_blocked()).cloned().collect()
    }

    pub fn instance(&self, consumer_id: &str) -> Option<&ResourceConstraintInstance> {
        self.live.iter().find(|i| i.consumer_id == consumer_id)
    }

    pub fn apply(&mut self, operation: LaneOperation, now: DateTime<Utc>) -> GatekeeperResult<LaneChange> {
        match operation {
            LaneOperation::Acquire(request) => self.acquire(request, now),
            LaneOperation::Release { consumer_id } => Ok(self.release(&consumer_id, now)),
            LaneOperation::Cancel { consumer_id } => Ok(self.cancel(&consumer_id, now)),
            LaneOperation::ReleaseEntity { release_entity_id } => {
                Ok(self.release_entity(&release_entity_id, now))
            }
        }
    }

    /// Enqueue a consumer BLOCKED, then try to promote waiters
    pub fn acquire(&mut self, request: AcquireRequest, now: DateTime<Utc>) -> GatekeeperResult<LaneChange> {
        let restraint = &request.restraint;
        restraint.validate()?;

        if restraint.constraint_key() != self.key {
            return Err(GatekeeperError::InvalidConstraint(format!(
                "restraint key {} does not belong to lane {}",
                restraint.constraint_key(),
                self.key
            )));
        }

        if let Some(existing) = self.instance(&request.consumer_id) {
            return Ok(LaneChange {
                acquire: Some(AcquireOutcome::for_instance(existing)),
                active_holders: self.active_count(),
                ..LaneChange::default()
            });
        }

        if let (Some(permits), Some(mode)) = (self.permits(), self.mode()) {
            if permits != restraint.permits || mode != restraint.acquire_mode {
                return Err(GatekeeperError::InvalidConstraint(format!(
                    "lane {} is held with {} permits in {} mode, request asked for {} permits in {} mode",
                    self.key, permits, mode, restraint.permits, restraint.acquire_mode
                )));
            }
        }

        let instance = ResourceConstraintInstance {
            id: Uuid::new_v4(),
            constraint_key: self.key.clone(),
            consumer_id: request.consumer_id.clone(),
            sequence: self.next_sequence,
            state: ConsumerState::Blocked,
            permits: restraint.permits,
            acquire_mode: restraint.acquire_mode,
            release_entity_id: request.release_entity_id,
            plan_execution_id: request.plan_execution_id,
            created_at: now,
            acquired_at: None,
            finished_at: None,
        };
        self.next_sequence += 1;
        self.live.push(instance);

        let promoted = self.promote(now);
        let subject = self
            .instance(&request.consumer_id)
            .cloned()
            .ok_or_else(|| GatekeeperError::StateMachine("enqueued instance vanished".to_string()))?;

        // The new row is written once with its final state; other promotions
        // are updates
        let mut written = vec![subject.clone()];
        written.extend(
            promoted
                .iter()
                .filter(|i| i.consumer_id != subject.consumer_id)
                .cloned(),
        );

        Ok(LaneChange {
            acquire: Some(AcquireOutcome::for_instance(&subject)),
            finished: Vec::new(),
            promoted: promoted
                .into_iter()
                .filter(|i| i.consumer_id != subject.consumer_id)
                .collect(),
            written,
            active_holders: self.active_count(),
        })
    }

    /// Finish the consumer's instance and promote waiters into the freed
    /// capacity. Releasing a consumer that holds nothing is a no-op.
    pub fn release(&mut self, consumer_id: &str, now: DateTime<Utc>) -> LaneChange {
        let Some(finished) = self.finish(consumer_id, now) else {
            return self.unchanged();
        };

        let promoted = self.promote(now);
        let mut written = vec![finished.clone()];
        written.extend(promoted.iter().cloned());

        LaneChange {
            acquire: None,
            finished: vec![finished],
            promoted,
            written,
            active_holders: self.active_count(),
        }
    }

    /// Finish every instance, holder or waiter, tied to a release entity
    /// whose holding scope ended, then promote waiters into the freed
    /// capacity
    pub fn release_entity(&mut self, release_entity_id: &str, now: DateTime<Utc>) -> LaneChange {
        let (ended, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.live)
            .into_iter()
            .partition(|instance| instance.release_entity_id == release_entity_id);
        self.live = kept;
        if ended.is_empty() {
            return self.unchanged();
        }

        let finished: Vec<ResourceConstraintInstance> = ended
            .into_iter()
            .map(|mut instance| {
                instance.state = ConsumerState::Finished;
                instance.finished_at = Some(now);
                instance
            })
            .collect();
        let promoted = self.promote(now);
        let mut written = finished.clone();
        written.extend(promoted.iter().cloned());

        LaneChange {
            acquire: None,
            finished,
            promoted,
            written,
            active_holders: self.active_count(),
        }
    }

    /// Withdraw a consumer. A BLOCKED waiter is removed without promoting
    /// anyone and without reordering the rest; an ACTIVE holder is released.
    pub fn cancel(&mut self, consumer_id: &str, now: DateTime<Utc>) -> LaneChange {
        match self.instance(consumer_id) {
            Some(instance) if instance.is_active() => self.release(consumer_id, now),
            Some(_) => {
                let Some(finished) = self.finish(consumer_id, now) else {
                    return self.unchanged();
                };
                LaneChange {
                    acquire: None,
                    finished: vec![finished.clone()],
                    promoted: Vec::new(),
                    written: vec![finished],
                    active_holders: self.active_count(),
                }
            }
            None => self.unchanged(),
        }
    }

    fn unchanged(&self) -> LaneChange {
        LaneChange {
            active_holders: self.active_count(),
            ..LaneChange::default()
        }
    }

    fn finish(&mut self, consumer_id: &str, now: DateTime<Utc>) -> Option<ResourceConstraintInstance> {
        let index = self.live.iter().position(|i| i.consumer_id == consumer_id)?;
        let mut instance = self.live.remove(index);
        instance.state = ConsumerState::Finished;
        instance.finished_at = Some(now);
        Some(instance)
    }

    /// Promote BLOCKED instances into free capacity and return them
    fn promote(&mut self, now: DateTime<Utc>) -> Vec<ResourceConstraintInstance> {
        let (Some(permits), Some(mode)) = (self.permits(), self.mode()) else {
            return Vec::new();
        };

        let free = (permits as usize).saturating_sub(self.active_count());
        if free == 0 {
            return Vec::new();
        }

        let candidates: Vec<usize> = match mode {
            // Oldest first, no skipping
            AcquireMode::Ensure => self
                .live
                .iter()
                .enumerate()
                .filter(|(_, i)| i.is_blocked())
                .map(|(index, _)| index)
                .take(free)
                .collect(),
            AcquireMode::BestEffort => {
                let holding: HashSet<&str> = self
                    .live
                    .iter()
                    .filter(|i| i.is_active())
                    .map(|i| i.release_entity_id.as_str())
                    .collect();

                let mut blocked: Vec<(bool, i64, usize)> = self
                    .live
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| i.is_blocked())
                    .map(|(index, i)| {
                        (
                            !holding.contains(i.release_entity_id.as_str()),
                            i.sequence,
                            index,
                        )
                    })
                    .collect();
                blocked.sort();
                blocked.into_iter().take(free).map(|(_, _, index)| index).collect()
            }
        };

        let mut promoted = Vec::with_capacity(candidates.len());
        for index in candidates {
            let instance = &mut self.live[index];
            instance.state = ConsumerState::Active;
            instance.acquired_at = Some(now);
            promoted.push(instance.clone());
        }
        promoted
    }
}
