use serde::{Deserialize, Serialize};
use std::fmt;

/// Approval instance status definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Initial state, waiting for a decision or the deadline
    Waiting,
    /// Approved by an explicit decision
    Approved,
    /// Rejected by an explicit decision
    Rejected,
    /// Deadline passed without a decision
    Expired,
    /// Owning step was aborted
    Aborted,
    /// Unrecoverable error while waiting
    Failed,
}

impl ApprovalStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting)
    }

    /// Check if the suspended step should continue successfully
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "aborted" => Ok(Self::Aborted),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid approval status: {s}")),
        }
    }
}

/// Default state for new approval instances
impl Default for ApprovalStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

/// Resource constraint consumer state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// Queued, waiting for capacity (and its turn in ENSURE mode)
    Blocked,
    /// Holding one permit of the lane
    Active,
    /// Released or cancelled
    Finished,
}

impl ConsumerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: ConsumerState) -> bool {
        matches!(
            (self, next),
            (Self::Blocked, Self::Active)
                | (Self::Blocked, Self::Finished)
                | (Self::Active, Self::Finished)
        )
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Active => write!(f, "active"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

impl std::str::FromStr for ConsumerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocked" => Ok(Self::Blocked),
            "active" => Ok(Self::Active),
            "finished" => Ok(Self::Finished),
            _ => Err(format!("Invalid consumer state: {s}")),
        }
    }
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self::Blocked
    }
}
