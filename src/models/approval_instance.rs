//! # Approval Instances
//!
//! Persisted record of a step suspended until an external approve/reject
//! decision arrives or its deadline passes.
//!
//! ## Lifecycle
//!
//! - Created WAITING when the approval step starts executing
//! - Moved to APPROVED/REJECTED by an explicit decision, to ABORTED when the
//!   owning step is aborted, to FAILED on an unrecoverable error
//! - Moved to EXPIRED by the sweeper once `deadline < now`
//!
//! All timestamps are epoch milliseconds.
//!
//! ## Database Schema
//!
//! Maps to the `approval_instances` table (see `migrations/`). The sweeper
//! drives off the `(status, next_iteration)` index.

use crate::state_machine::ApprovalStatus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// Approval flavor. Flavors share the lifecycle but differ in who decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalType {
    /// Users from the configured user groups vote in the UI / API
    ManualApproval,
    /// An external system posts the decision to a webhook
    WebhookApproval,
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManualApproval => write!(f, "MANUAL_APPROVAL"),
            Self::WebhookApproval => write!(f, "WEBHOOK_APPROVAL"),
        }
    }
}

impl std::str::FromStr for ApprovalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL_APPROVAL" => Ok(Self::ManualApproval),
            "WEBHOOK_APPROVAL" => Ok(Self::WebhookApproval),
            _ => Err(format!("Invalid approval type: {s}")),
        }
    }
}

/// Who may approve a manual approval and how many approvals are required
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverSpec {
    pub user_groups: Vec<String>,
    pub minimum_count: u32,
    /// Refuse votes from the principal that triggered the pipeline
    pub disallow_pipeline_executor: bool,
}

impl Default for ApproverSpec {
    fn default() -> Self {
        Self {
            user_groups: Vec::new(),
            minimum_count: 1,
            disallow_pipeline_executor: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

/// One vote recorded against a manual approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalActivity {
    pub approver: String,
    pub action: ApprovalAction,
    pub comments: Option<String>,
    pub recorded_at: i64,
}

/// A decisive approve/reject request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub action: ApprovalAction,
    pub decided_by: Option<String>,
    pub comments: Option<String>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            action: ApprovalAction::Approve,
            decided_by: None,
            comments: None,
        }
    }

    pub fn reject() -> Self {
        Self {
            action: ApprovalAction::Reject,
            decided_by: None,
            comments: None,
        }
    }

    pub fn by(mut self, decided_by: impl Into<String>) -> Self {
        self.decided_by = Some(decided_by.into());
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: Uuid,
    pub approval_type: ApprovalType,
    pub status: ApprovalStatus,
    pub deadline: i64,
    pub created_at: i64,
    pub last_modified_at: i64,
    pub next_iteration: i64,
    pub account_id: String,
    pub org_identifier: String,
    pub project_identifier: String,
    pub pipeline_identifier: String,
    pub plan_execution_id: String,
    pub node_execution_id: String,
    /// Correlation id the suspended step waits on
    pub callback_id: String,
    /// Principal that triggered the pipeline run, if known
    pub triggered_by: Option<String>,
    pub approvers: Option<ApproverSpec>,
    pub activities: Vec<ApprovalActivity>,
    pub error_message: Option<String>,
    /// Bumped on every write, used for compare-and-set updates
    #[serde(default)]
    pub version: i64,
}

impl ApprovalInstance {
    /// True once the deadline lies strictly in the past
    pub fn has_expired(&self, now: i64) -> bool {
        self.deadline < now
    }

    pub fn is_waiting(&self) -> bool {
        self.status == ApprovalStatus::Waiting
    }

    pub fn approval_count(&self) -> usize {
        self.activities
            .iter()
            .filter(|activity| activity.action == ApprovalAction::Approve)
            .count()
    }

    pub fn has_vote_from(&self, approver: &str) -> bool {
        self.activities
            .iter()
            .any(|activity| activity.approver == approver)
    }

    pub fn minimum_approvals(&self) -> u32 {
        self.approvers
            .as_ref()
            .map(|spec| spec.minimum_count.max(1))
            .unwrap_or(1)
    }

    /// Outputs exposed to downstream steps once the approval step finishes
    pub fn summary_outputs(&self) -> Value {
        json!({
            "approvalInstanceId": self.id.to_string(),
            "approvalType": self.approval_type.to_string(),
            "status": self.status.to_string(),
            "deadline": self.deadline,
            "approvalActivities": self.activities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(deadline: i64) -> ApprovalInstance {
        ApprovalInstance {
            id: Uuid::new_v4(),
            approval_type: ApprovalType::ManualApproval,
            status: ApprovalStatus::Waiting,
            deadline,
            created_at: 0,
            last_modified_at: 0,
            next_iteration: 0,
            account_id: "acc".to_string(),
            org_identifier: "org".to_string(),
            project_identifier: "proj".to_string(),
            pipeline_identifier: "pipe".to_string(),
            plan_execution_id: "plan".to_string(),
            node_execution_id: "node".to_string(),
            callback_id: "cb".to_string(),
            triggered_by: None,
            approvers: Some(ApproverSpec {
                minimum_count: 2,
                ..ApproverSpec::default()
            }),
            activities: Vec::new(),
            error_message: None,
            version: 0,
        }
    }

    #[test]
    fn test_has_expired_is_strict() {
        let approval = instance(1_000);
        assert!(!approval.has_expired(999));
        assert!(!approval.has_expired(1_000));
        assert!(approval.has_expired(1_001));
    }

    #[test]
    fn test_approval_counting() {
        let mut approval = instance(1_000);
        approval.activities.push(ApprovalActivity {
            approver: "bob".to_string(),
            action: ApprovalAction::Approve,
            comments: None,
            recorded_at: 10,
        });
        assert_eq!(approval.approval_count(), 1);
        assert_eq!(approval.minimum_approvals(), 2);
        assert!(approval.has_vote_from("bob"));
        assert!(!approval.has_vote_from("carol"));
        assert_eq!(approval.summary_outputs()["status"], "waiting");
    }
}
