//! # Orchestrator Callback
//!
//! Outbound contract through which suspended steps are woken. The constraint
//! queue notifies it when a waiter is promoted, the approval service when an
//! instance reaches a terminal status, and the orchestrator routes each
//! signal to [`crate::execution::StepDispatcher::resume`].

use super::types::ResponseData;
use crate::error::{GatekeeperError, GatekeeperResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Completion of one awaited unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub node_execution_id: String,
    /// Callback id, task id or child node id the step is waiting on
    pub correlation_id: String,
    pub payload: ResponseData,
}

impl CompletionSignal {
    pub fn new(
        node_execution_id: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: ResponseData,
    ) -> Self {
        Self {
            node_execution_id: node_execution_id.into(),
            correlation_id: correlation_id.into(),
            payload,
        }
    }
}

#[async_trait]
pub trait OrchestratorCallback: Send + Sync + std::fmt::Debug {
    async fn notify(&self, signal: CompletionSignal) -> GatekeeperResult<()>;
}

/// Callback that forwards signals into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    sender: mpsc::UnboundedSender<CompletionSignal>,
}

impl ChannelCallback {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CompletionSignal>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl OrchestratorCallback for ChannelCallback {
    async fn notify(&self, signal: CompletionSignal) -> GatekeeperResult<()> {
        self.sender.send(signal).map_err(|err| {
            GatekeeperError::Callback(format!(
                "orchestrator channel closed while notifying {}",
                err.0.node_execution_id
            ))
        })
    }
}
