// State machine module for coordination records
//
// Approval instances and constraint consumers both follow small, closed
// transition tables. The tables are pure; stores apply them atomically.

pub mod approval_state_machine;
pub mod errors;
pub mod events;
pub mod states;

// Re-export main types for convenient access
pub use approval_state_machine::ApprovalStateMachine;
pub use errors::{StateMachineError, StateMachineResult};
pub use events::ApprovalEvent;
pub use states::{ApprovalStatus, ConsumerState};
