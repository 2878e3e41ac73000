//! # Built-in Steps
//!
//! Coordination steps shipped with the core. Both run in the async shape and
//! suspend on callback ids fed by the constraint queue and the approval
//! service.

pub mod approval;
pub mod resource_restraint;

pub use approval::ApprovalStep;
pub use resource_restraint::ResourceRestraintStep;

use crate::approvals::ApprovalService;
use crate::constants::step_types;
use crate::constraints::ResourceConstraintQueue;
use crate::error::GatekeeperResult;
use crate::execution::traits::Executable;
use crate::registry::StepRegistry;
use std::sync::Arc;

/// Register the built-in steps under their step type names
pub fn register_builtin_steps(
    registry: &StepRegistry,
    queue: Arc<ResourceConstraintQueue>,
    approvals: Arc<ApprovalService>,
) -> GatekeeperResult<()> {
    let restraint = Executable::Async(Arc::new(ResourceRestraintStep::new(queue)));
    registry.register(step_types::RESOURCE_RESTRAINT, restraint.clone())?;
    registry.register(step_types::QUEUE, restraint)?;

    let approval = Executable::Async(Arc::new(ApprovalStep::new(approvals)));
    registry.register(step_types::HARNESS_APPROVAL, approval.clone())?;
    registry.register(step_types::WEBHOOK_APPROVAL, approval)?;
    Ok(())
}
