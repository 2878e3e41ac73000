//! # Coordination Models
//!
//! Data types shared by the authorization gate, the constraint queue and the
//! approval state machine.

pub mod approval_instance;
pub mod constraint_instance;
pub mod entity_reference;
pub mod execution_context;
pub mod failure;
pub mod resource_restraint;
pub mod step_parameters;

pub use approval_instance::{
    ApprovalAction, ApprovalActivity, ApprovalDecision, ApprovalInstance, ApprovalType,
    ApproverSpec,
};
pub use constraint_instance::ResourceConstraintInstance;
pub use entity_reference::{EntityReference, ResourceScope, ResourceType};
pub use execution_context::{ExecutionContext, ExecutionPrincipal, PrincipalType};
pub use failure::{FailureInfo, FailureType};
pub use resource_restraint::{AcquireMode, ConstraintKey, HoldingScope, ResourceRestraint, ScopeLevel};
pub use step_parameters::{
    ApprovalSpec, ParameterField, ResourceRestraintSpec, StepParameters, StepSpec,
};
