//! # Approvals
//!
//! Approval instances that hold a step until an external decision arrives or
//! the deadline passes.

pub mod service;
pub mod store;
pub mod sweeper;
pub mod timeout;

pub use service::{completion_payload, ApprovalService, SweepReport};
pub use store::{ApprovalStore, InMemoryApprovalStore};
pub use sweeper::ApprovalSweeper;
pub use timeout::{compute_deadline, parse_duration_millis, resolve_timeout_millis};
