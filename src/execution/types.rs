//! # Execution Types
//!
//! Values exchanged between the orchestrator and an executable: the final
//! [`StepResponse`], the data delivered on resumption and the shape-specific
//! responses that suspend a step.

use crate::models::failure::{FailureInfo, FailureType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Final status of a step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Succeeded,
    Failed,
    ApprovalRejected,
    Expired,
    Aborted,
    Skipped,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::ApprovalRejected => "APPROVAL_REJECTED",
            Self::Expired => "EXPIRED",
            Self::Aborted => "ABORTED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(label)
    }
}

/// Terminal outcome of one step, returned to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: StepStatus,
    #[serde(default)]
    pub outputs: Value,
    pub failure: Option<FailureInfo>,
}

impl StepResponse {
    pub fn succeeded(outputs: Value) -> Self {
        Self {
            status: StepStatus::Succeeded,
            outputs,
            failure: None,
        }
    }

    pub fn failed(failure: FailureInfo) -> Self {
        Self {
            status: StepStatus::Failed,
            outputs: Value::Null,
            failure: Some(failure),
        }
    }

    pub fn with_status(status: StepStatus, outputs: Value, failure: Option<FailureInfo>) -> Self {
        Self {
            status,
            outputs,
            failure,
        }
    }

    pub fn aborted() -> Self {
        Self {
            status: StepStatus::Aborted,
            outputs: Value::Null,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn has_failure_type(&self, failure_type: FailureType) -> bool {
        self.failure
            .as_ref()
            .map(|failure| failure.has_type(failure_type))
            .unwrap_or(false)
    }
}

/// Data delivered when an awaited callback, task, or child completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseData {
    Success {
        #[serde(default)]
        outputs: Value,
    },
    Failure {
        failure: FailureInfo,
        #[serde(default)]
        outputs: Value,
    },
}

impl ResponseData {
    pub fn success(outputs: Value) -> Self {
        Self::Success { outputs }
    }

    pub fn failure(failure: FailureInfo) -> Self {
        Self::Failure {
            failure,
            outputs: Value::Null,
        }
    }

    pub fn failure_with_outputs(failure: FailureInfo, outputs: Value) -> Self {
        Self::Failure { failure, outputs }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn outputs(&self) -> &Value {
        match self {
            Self::Success { outputs } | Self::Failure { outputs, .. } => outputs,
        }
    }

    pub fn failure_info(&self) -> Option<&FailureInfo> {
        match self {
            Self::Failure { failure, .. } => Some(failure),
            Self::Success { .. } => None,
        }
    }

    /// Step response mirroring this data
    pub fn into_step_response(self) -> StepResponse {
        match self {
            Self::Success { outputs } => StepResponse::succeeded(outputs),
            Self::Failure { failure, outputs } => {
                StepResponse::with_status(StepStatus::Failed, outputs, Some(failure))
            }
        }
    }
}

/// Resolved inputs handed to the step alongside its parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInputPackage {
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
}

impl StepInputPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }
}

/// Async shape: the step is woken once every callback id has been notified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncExecutableResponse {
    pub callback_ids: Vec<String>,
    /// Response already available at execution time, keyed by callback id
    #[serde(default)]
    pub immediate: HashMap<String, ResponseData>,
}

impl AsyncExecutableResponse {
    pub fn awaiting(callback_ids: Vec<String>) -> Self {
        Self {
            callback_ids,
            immediate: HashMap::new(),
        }
    }
}

/// Unit of external work delegated to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Correlation id the worker response is delivered under
    pub task_id: Uuid,
    pub task_type: String,
    pub payload: Value,
    pub timeout_ms: Option<i64>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type: task_type.into(),
            payload,
            timeout_ms: None,
        }
    }
}

/// Single-child shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildExecutableResponse {
    pub child_node_id: String,
    #[serde(default)]
    pub pass_through: Value,
}

/// Child-chain shape. `last_link` tells the orchestrator that no further
/// link follows this child; `child_node_id` is `None` when there is nothing
/// left to run at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildChainExecutableResponse {
    pub child_node_id: Option<String>,
    pub last_link: bool,
    #[serde(default)]
    pub pass_through: Value,
}

impl ChildChainExecutableResponse {
    pub fn link(child_node_id: impl Into<String>, last_link: bool, pass_through: Value) -> Self {
        Self {
            child_node_id: Some(child_node_id.into()),
            last_link,
            pass_through,
        }
    }

    pub fn finished(pass_through: Value) -> Self {
        Self {
            child_node_id: None,
            last_link: true,
            pass_through,
        }
    }
}

/// Multi-children shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildrenExecutableResponse {
    pub child_node_ids: Vec<String>,
}
