//! # Continuations
//!
//! A continuation is the persisted state of a suspended step: who it is, how
//! it was executed, which correlation ids it still waits on and what has
//! arrived so far. It is keyed by node execution id.

use super::traits::{ExecutionMode, ResponseMap};
use super::types::ResponseData;
use crate::error::GatekeeperResult;
use crate::models::execution_context::ExecutionContext;
use crate::models::step_parameters::StepParameters;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    pub node_execution_id: String,
    pub mode: ExecutionMode,
    pub context: ExecutionContext,
    pub parameters: StepParameters,
    /// Correlation ids not yet delivered
    pub awaiting: Vec<String>,
    pub responses: ResponseMap,
    #[serde(default)]
    pub pass_through: Value,
    /// Child chains only: the awaited child is the last link
    #[serde(default)]
    pub last_link: bool,
    pub suspended_at: DateTime<Utc>,
}

impl Continuation {
    pub fn new(
        mode: ExecutionMode,
        context: ExecutionContext,
        parameters: StepParameters,
        awaiting: Vec<String>,
    ) -> Self {
        Self {
            node_execution_id: context.node_execution_id.clone(),
            mode,
            context,
            parameters,
            awaiting,
            responses: ResponseMap::new(),
            pass_through: Value::Null,
            last_link: false,
            suspended_at: Utc::now(),
        }
    }

    pub fn with_pass_through(mut self, pass_through: Value) -> Self {
        self.pass_through = pass_through;
        self
    }

    pub fn with_last_link(mut self, last_link: bool) -> Self {
        self.last_link = last_link;
        self
    }

    pub fn with_responses(mut self, responses: ResponseMap) -> Self {
        self.responses = responses;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.awaiting.is_empty()
    }

    /// Record a delivered response. Returns false when the correlation id is
    /// not awaited (unknown or already delivered).
    pub fn record(&mut self, correlation_id: &str, data: ResponseData) -> bool {
        let Some(index) = self.awaiting.iter().position(|id| id == correlation_id) else {
            return false;
        };
        self.awaiting.remove(index);
        self.responses.insert(correlation_id.to_string(), data);
        true
    }
}

/// Result of delivering responses to the store
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseRecord {
    /// No continuation or reservation for the node execution
    UnknownNode,
    /// The continuation does not wait on this correlation id
    UnexpectedCorrelation,
    /// The node is reserved but not yet suspended; the response is held until
    /// the continuation is saved
    Buffered,
    /// Still waiting on `remaining` correlation ids
    Pending { remaining: Vec<String> },
    /// Last awaited response arrived; the continuation was removed from the
    /// store and handed to the caller
    Complete(Continuation),
    /// The node was aborted while its step was executing. Returned by `save`,
    /// which hands the continuation back for the abort hook.
    Aborted(Continuation),
}

/// Result of aborting a node
#[derive(Debug, Clone, PartialEq)]
pub enum AbortRecord {
    /// Nothing reserved or suspended under the node execution id
    UnknownNode,
    /// The step is still executing; the reservation now carries an abort
    /// marker that the next `save` reports
    Marked,
    /// The suspended continuation was removed and handed to the caller
    Taken(Continuation),
}

/// Storage for continuations.
///
/// A node is reserved before its step executes so that a completion racing
/// ahead of `save` is buffered instead of lost. `save` and `record_response`
/// must be atomic per node so that exactly one caller observes `Complete`.
#[async_trait]
pub trait ContinuationStore: Send + Sync + std::fmt::Debug {
    async fn reserve(&self, node_execution_id: &str) -> GatekeeperResult<()>;

    /// Store a continuation, merging responses buffered under its reservation
    async fn save(&self, continuation: Continuation) -> GatekeeperResult<ResponseRecord>;

    async fn get(&self, node_execution_id: &str) -> GatekeeperResult<Option<Continuation>>;

    /// Remove the node's continuation or reservation
    async fn take(&self, node_execution_id: &str) -> GatekeeperResult<Option<Continuation>>;

    /// Remove a suspended continuation, or mark a bare reservation as aborted
    /// so the continuation saved for it later is never suspended
    async fn abort(&self, node_execution_id: &str) -> GatekeeperResult<AbortRecord>;

    async fn record_response(
        &self,
        node_execution_id: &str,
        correlation_id: &str,
        data: ResponseData,
    ) -> GatekeeperResult<ResponseRecord>;
}

#[derive(Debug, Default)]
struct Slot {
    continuation: Option<Continuation>,
    early: Vec<(String, ResponseData)>,
    aborted: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryContinuationStore {
    slots: DashMap<String, Slot>,
}

impl InMemoryContinuationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl ContinuationStore for InMemoryContinuationStore {
    async fn reserve(&self, node_execution_id: &str) -> GatekeeperResult<()> {
        self.slots
            .entry(node_execution_id.to_string())
            .or_default();
        Ok(())
    }

    async fn save(&self, mut continuation: Continuation) -> GatekeeperResult<ResponseRecord> {
        match self.slots.entry(continuation.node_execution_id.clone()) {
            Entry::Vacant(entry) => {
                if continuation.is_complete() {
                    return Ok(ResponseRecord::Complete(continuation));
                }
                let remaining = continuation.awaiting.clone();
                entry.insert(Slot {
                    continuation: Some(continuation),
                    early: Vec::new(),
                    aborted: false,
                });
                Ok(ResponseRecord::Pending { remaining })
            }
            Entry::Occupied(mut entry) => {
                if entry.get().aborted {
                    entry.remove();
                    return Ok(ResponseRecord::Aborted(continuation));
                }
                for (correlation_id, data) in std::mem::take(&mut entry.get_mut().early) {
                    continuation.record(&correlation_id, data);
                }
                if continuation.is_complete() {
                    entry.remove();
                    return Ok(ResponseRecord::Complete(continuation));
                }
                let remaining = continuation.awaiting.clone();
                entry.get_mut().continuation = Some(continuation);
                Ok(ResponseRecord::Pending { remaining })
            }
        }
    }

    async fn get(&self, node_execution_id: &str) -> GatekeeperResult<Option<Continuation>> {
        Ok(self
            .slots
            .get(node_execution_id)
            .and_then(|slot| slot.continuation.clone()))
    }

    async fn take(&self, node_execution_id: &str) -> GatekeeperResult<Option<Continuation>> {
        Ok(self
            .slots
            .remove(node_execution_id)
            .and_then(|(_, slot)| slot.continuation))
    }

    async fn abort(&self, node_execution_id: &str) -> GatekeeperResult<AbortRecord> {
        let Entry::Occupied(mut entry) = self.slots.entry(node_execution_id.to_string()) else {
            return Ok(AbortRecord::UnknownNode);
        };

        if entry.get().continuation.is_some() {
            return Ok(match entry.remove().continuation {
                Some(continuation) => AbortRecord::Taken(continuation),
                None => AbortRecord::UnknownNode,
            });
        }

        let slot = entry.get_mut();
        if slot.aborted {
            return Ok(AbortRecord::UnknownNode);
        }
        slot.aborted = true;
        slot.early.clear();
        Ok(AbortRecord::Marked)
    }

    async fn record_response(
        &self,
        node_execution_id: &str,
        correlation_id: &str,
        data: ResponseData,
    ) -> GatekeeperResult<ResponseRecord> {
        let Entry::Occupied(mut entry) = self.slots.entry(node_execution_id.to_string()) else {
            return Ok(ResponseRecord::UnknownNode);
        };

        let slot = entry.get_mut();
        if slot.aborted {
            return Ok(ResponseRecord::UnknownNode);
        }
        let Some(continuation) = slot.continuation.as_mut() else {
            slot.early.push((correlation_id.to_string(), data));
            return Ok(ResponseRecord::Buffered);
        };

        if !continuation.record(correlation_id, data) {
            return Ok(ResponseRecord::UnexpectedCorrelation);
        }
        if !continuation.is_complete() {
            return Ok(ResponseRecord::Pending {
                remaining: continuation.awaiting.clone(),
            });
        }

        match entry.remove().continuation {
            Some(continuation) => Ok(ResponseRecord::Complete(continuation)),
            None => Ok(ResponseRecord::UnknownNode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::step_parameters::StepSpec;
    use serde_json::json;

    fn continuation(awaiting: &[&str]) -> Continuation {
        let ctx = ExecutionContext::new("acc", "org", "proj", "pipe", "plan-1", "node-1");
        let params = StepParameters::new("step", "Custom", StepSpec::Generic(json!({})));
        Continuation::new(
            ExecutionMode::Children,
            ctx,
            params,
            awaiting.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_complete_only_after_all_responses() {
        let store = InMemoryContinuationStore::new();
        store.save(continuation(&["c1", "c2"])).await.unwrap();

        let first = store
            .record_response("node-1", "c1", ResponseData::success(json!({})))
            .await
            .unwrap();
        assert_eq!(
            first,
            ResponseRecord::Pending {
                remaining: vec!["c2".to_string()]
            }
        );

        let duplicate = store
            .record_response("node-1", "c1", ResponseData::success(json!({})))
            .await
            .unwrap();
        assert_eq!(duplicate, ResponseRecord::UnexpectedCorrelation);

        let last = store
            .record_response("node-1", "c2", ResponseData::success(json!({"n": 2})))
            .await
            .unwrap();
        match last {
            ResponseRecord::Complete(continuation) => {
                assert_eq!(continuation.responses.len(), 2);
                assert_eq!(continuation.responses["c2"].outputs()["n"], 2);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_node_is_reported() {
        let store = InMemoryContinuationStore::new();
        let record = store
            .record_response("missing", "c1", ResponseData::success(json!({})))
            .await
            .unwrap();
        assert_eq!(record, ResponseRecord::UnknownNode);
    }

    #[tokio::test]
    async fn test_response_racing_ahead_of_save_is_buffered() {
        let store = InMemoryContinuationStore::new();
        store.reserve("node-1").await.unwrap();

        let early = store
            .record_response("node-1", "c1", ResponseData::success(json!({"early": true})))
            .await
            .unwrap();
        assert_eq!(early, ResponseRecord::Buffered);

        match store.save(continuation(&["c1"])).await.unwrap() {
            ResponseRecord::Complete(continuation) => {
                assert_eq!(continuation.responses["c1"].outputs()["early"], true);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_abort_during_execution_marks_reservation() {
        let store = InMemoryContinuationStore::new();
        store.reserve("node-1").await.unwrap();

        assert_eq!(store.abort("node-1").await.unwrap(), AbortRecord::Marked);
        assert_eq!(store.abort("node-1").await.unwrap(), AbortRecord::UnknownNode);

        let late = store
            .record_response("node-1", "c1", ResponseData::success(json!({})))
            .await
            .unwrap();
        assert_eq!(late, ResponseRecord::UnknownNode);

        match store.save(continuation(&["c1"])).await.unwrap() {
            ResponseRecord::Aborted(continuation) => {
                assert_eq!(continuation.node_execution_id, "node-1");
                assert!(continuation.responses.is_empty());
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_abort_takes_suspended_continuation() {
        let store = InMemoryContinuationStore::new();
        store.save(continuation(&["c1"])).await.unwrap();

        assert!(matches!(
            store.abort("node-1").await.unwrap(),
            AbortRecord::Taken(_)
        ));
        assert!(store.is_empty());
        assert_eq!(store.abort("node-1").await.unwrap(), AbortRecord::UnknownNode);
    }
}
