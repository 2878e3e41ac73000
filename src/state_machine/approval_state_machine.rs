use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ApprovalEvent,
    states::ApprovalStatus,
};

/// Transition table for approval instances.
///
/// The machine is pure: persistence applies the returned status with a
/// compare-and-set on `Waiting`, so a racing sweep and decision can never both
/// take effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    /// Determine the target status for `event` applied to `current`
    pub fn determine_target_state(
        current: ApprovalStatus,
        event: &ApprovalEvent,
    ) -> StateMachineResult<ApprovalStatus> {
        let target = match (current, event) {
            (ApprovalStatus::Waiting, ApprovalEvent::Approve) => ApprovalStatus::Approved,
            (ApprovalStatus::Waiting, ApprovalEvent::Reject) => ApprovalStatus::Rejected,
            (ApprovalStatus::Waiting, ApprovalEvent::Expire) => ApprovalStatus::Expired,
            (ApprovalStatus::Waiting, ApprovalEvent::Abort) => ApprovalStatus::Aborted,
            (ApprovalStatus::Waiting, ApprovalEvent::Fail(_)) => ApprovalStatus::Failed,

            // Terminal states accept nothing
            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Check whether `event` can be applied to `current`
    pub fn can_apply(current: ApprovalStatus, event: &ApprovalEvent) -> bool {
        Self::determine_target_state(current, event).is_ok()
    }
}
