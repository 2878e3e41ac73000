//! # Step Parameters
//!
//! Declared inputs of one step, owned by the orchestrator and passed by
//! reference into the executable contract. Values that may still hold an
//! unresolved pipeline expression are wrapped in [`ParameterField`].

use crate::models::approval_instance::{ApprovalType, ApproverSpec};
use crate::models::entity_reference::EntityReference;
use crate::models::resource_restraint::{AcquireMode, ScopeLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker that opens a pipeline expression, e.g. `<+pipeline.variables.timeout>`
pub const EXPRESSION_PREFIX: &str = "<+";

/// A parameter that is either a concrete value or an expression the
/// orchestrator failed to resolve before handing the step over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterField<T> {
    Expression { expression: String },
    Value(T),
}

impl<T> ParameterField<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Expression { .. } => None,
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression { .. })
    }
}

impl ParameterField<String> {
    /// Classify a raw string: anything still containing `<+` is an expression
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.contains(EXPRESSION_PREFIX) {
            Self::Expression { expression: raw }
        } else {
            Self::Value(raw)
        }
    }
}

/// Inputs of the built-in resource restraint (queue) step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRestraintSpec {
    pub name: String,
    pub resource_unit: String,
    pub scope: ScopeLevel,
    /// Group name when `scope` is `Group`
    pub group: Option<String>,
    pub permits: u32,
    pub acquire_mode: AcquireMode,
}

/// Inputs of the built-in approval step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSpec {
    pub approval_type: ApprovalType,
    pub approvers: Option<ApproverSpec>,
    pub message: Option<String>,
}

/// Step specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec")]
pub enum StepSpec {
    ResourceRestraint(ResourceRestraintSpec),
    Approval(ApprovalSpec),
    /// Payload of steps whose logic lives outside this crate
    Generic(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepParameters {
    pub identifier: String,
    pub name: String,
    pub step_type: String,
    pub timeout: Option<ParameterField<String>>,
    /// Entities this step uses; each one is authorized before execution
    #[serde(default)]
    pub entity_refs: Vec<EntityReference>,
    pub spec: StepSpec,
}

impl StepParameters {
    pub fn new(identifier: impl Into<String>, step_type: impl Into<String>, spec: StepSpec) -> Self {
        let identifier = identifier.into();
        Self {
            name: identifier.clone(),
            identifier,
            step_type: step_type.into(),
            timeout: None,
            entity_refs: Vec::new(),
            spec,
        }
    }

    pub fn with_timeout(mut self, raw: impl Into<String>) -> Self {
        self.timeout = Some(ParameterField::from_raw(raw));
        self
    }

    pub fn with_entity_ref(mut self, entity: EntityReference) -> Self {
        self.entity_refs.push(entity);
        self
    }

    pub fn resource_restraint_spec(&self) -> Option<&ResourceRestraintSpec> {
        match &self.spec {
            StepSpec::ResourceRestraint(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn approval_spec(&self) -> Option<&ApprovalSpec> {
        match &self.spec {
            StepSpec::Approval(spec) => Some(spec),
            _ => None,
        }
    }
}
