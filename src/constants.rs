//! # System Constants
//!
//! Event names, default values and limits that define the operational
//! boundaries of the coordination core.

/// Lifecycle events published through the [`crate::events::EventPublisher`]
pub mod events {
    // Step execution events
    pub const STEP_AUTHORIZED: &str = "step.authorized";
    pub const STEP_ACCESS_DENIED: &str = "step.access_denied";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_SUSPENDED: &str = "step.suspended";
    pub const STEP_RESUMED: &str = "step.resumed";
    pub const STEP_ABORTED: &str = "step.aborted";

    // Resource constraint events
    pub const CONSTRAINT_GRANTED: &str = "constraint.granted";
    pub const CONSTRAINT_BLOCKED: &str = "constraint.blocked";
    pub const CONSTRAINT_RELEASED: &str = "constraint.released";
    pub const CONSTRAINT_CANCELLED: &str = "constraint.cancelled";
    pub const CONSTRAINT_PROMOTED: &str = "constraint.promoted";

    // Approval events
    pub const APPROVAL_CREATED: &str = "approval.created";
    pub const APPROVAL_ACTIVITY_RECORDED: &str = "approval.activity_recorded";
    pub const APPROVAL_APPROVED: &str = "approval.approved";
    pub const APPROVAL_REJECTED: &str = "approval.rejected";
    pub const APPROVAL_EXPIRED: &str = "approval.expired";
    pub const APPROVAL_ABORTED: &str = "approval.aborted";
    pub const APPROVAL_FAILED: &str = "approval.failed";
}

/// Step types of the built-in coordination steps
pub mod step_types {
    pub const RESOURCE_RESTRAINT: &str = "ResourceRestraint";
    pub const QUEUE: &str = "Queue";
    pub const HARNESS_APPROVAL: &str = "HarnessApproval";
    pub const WEBHOOK_APPROVAL: &str = "WebhookApproval";
}

/// Constraint family used by queue steps
pub const QUEUE_CONSTRAINT_NAME: &str = "Queuing";

/// Platform default approval timeout
pub const DEFAULT_APPROVAL_TIMEOUT: &str = "7d";

/// How often the sweeper polls for due approval instances
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;

/// Delay before a still-waiting approval is revisited by the sweep
pub const DEFAULT_ITERATION_INTERVAL_MS: i64 = 60_000;

/// Maximum due instances handled per sweep page
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;

/// Upper bound on `permits` accepted on a restraint
pub const DEFAULT_MAX_PERMITS: u32 = 1_000;

/// Broadcast channel capacity for lifecycle events
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1_000;
