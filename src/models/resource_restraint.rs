//! # Resource Restraints
//!
//! A restraint names one contended resource lane: a constraint family
//! (`name`), the specific unit being contended (`resource_unit`, e.g. an
//! environment id) and the holding scope at which concurrent holders are
//! counted. `permits` bounds the number of simultaneous holders.
//!
//! Two restraints with the same `(name, resource_unit, holding_scope)` share
//! one lane, identified by a [`ConstraintKey`].

use crate::error::{GatekeeperError, GatekeeperResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grant ordering policy for a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquireMode {
    /// Strict arrival order: waiter N+1 is never granted before waiter N
    Ensure,
    /// Capacity bounded only, grants may happen out of arrival order
    BestEffort,
}

impl fmt::Display for AcquireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ensure => write!(f, "ENSURE"),
            Self::BestEffort => write!(f, "BEST_EFFORT"),
        }
    }
}

impl std::str::FromStr for AcquireMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENSURE" => Ok(Self::Ensure),
            "BEST_EFFORT" => Ok(Self::BestEffort),
            _ => Err(format!("Invalid acquire mode: {s}")),
        }
    }
}

/// DAG granularity at which holders are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeLevel {
    Pipeline,
    Stage,
    Group,
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "PIPELINE"),
            Self::Stage => write!(f, "STAGE"),
            Self::Group => write!(f, "GROUP"),
        }
    }
}

/// Scope level plus the id of the scope instance (plan execution id, stage
/// execution id or group name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldingScope {
    pub level: ScopeLevel,
    pub scope_id: String,
}

impl HoldingScope {
    pub fn new(level: ScopeLevel, scope_id: impl Into<String>) -> Self {
        Self {
            level,
            scope_id: scope_id.into(),
        }
    }
}

impl fmt::Display for HoldingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.scope_id)
    }
}

/// Identity of one contended lane
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintKey(String);

impl ConstraintKey {
    pub fn new(name: &str, resource_unit: &str, holding_scope: &HoldingScope) -> Self {
        Self(format!("{name}|{resource_unit}|{holding_scope}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConstraintKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared need for (exclusive or N-way) access to a resource unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRestraint {
    pub name: String,
    pub resource_unit: String,
    pub holding_scope: HoldingScope,
    pub permits: u32,
    pub acquire_mode: AcquireMode,
}

impl ResourceRestraint {
    pub fn new(
        name: impl Into<String>,
        resource_unit: impl Into<String>,
        holding_scope: HoldingScope,
        permits: u32,
        acquire_mode: AcquireMode,
    ) -> Self {
        Self {
            name: name.into(),
            resource_unit: resource_unit.into(),
            holding_scope,
            permits,
            acquire_mode,
        }
    }

    /// Mutual exclusion lane in strict FIFO order
    pub fn queue(resource_unit: impl Into<String>, holding_scope: HoldingScope) -> Self {
        Self::new(
            crate::constants::QUEUE_CONSTRAINT_NAME,
            resource_unit,
            holding_scope,
            1,
            AcquireMode::Ensure,
        )
    }

    pub fn constraint_key(&self) -> ConstraintKey {
        ConstraintKey::new(&self.name, &self.resource_unit, &self.holding_scope)
    }

    pub fn validate(&self) -> GatekeeperResult<()> {
        if self.permits < 1 {
            return Err(GatekeeperError::InvalidConstraint(format!(
                "permits must be at least 1 for constraint '{}', got {}",
                self.name, self.permits
            )));
        }
        if self.name.trim().is_empty() {
            return Err(GatekeeperError::InvalidConstraint(
                "constraint name must not be empty".to_string(),
            ));
        }
        if self.resource_unit.trim().is_empty() {
            return Err(GatekeeperError::InvalidConstraint(format!(
                "resource unit must not be empty for constraint '{}'",
                self.name
            )));
        }
        if self.holding_scope.scope_id.trim().is_empty() {
            return Err(GatekeeperError::InvalidConstraint(format!(
                "holding scope {} has no scope id",
                self.holding_scope.level
            )));
        }
        Ok(())
    }
}
