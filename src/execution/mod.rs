//! # Execution Contract
//!
//! How a single step is gated, run, suspended and resumed.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator ──start──▶ StepDispatcher ──▶ AuthorizationGate
//!                              │                   │ ok
//!                              │             validate_resources
//!                              ▼                   │ ok
//!                        Executable (shape) ◀──────┘
//!                              │ suspends
//!                              ▼
//!                       ContinuationStore ◀──resume── OrchestratorCallback
//! ```

pub mod callback;
pub mod continuation;
pub mod dispatcher;
pub mod traits;
pub mod types;

pub use callback::{ChannelCallback, CompletionSignal, OrchestratorCallback};
pub use continuation::{
    AbortRecord, Continuation, ContinuationStore, InMemoryContinuationStore, ResponseRecord,
};
pub use dispatcher::{DispatchOutcome, StepDispatcher, Suspension, SuspensionRequest};
pub use traits::{
    AsyncExecutable, ChildChainExecutable, ChildExecutable, ChildrenExecutable, Executable,
    ExecutionMode, ResponseMap, StepExecutable, SyncExecutable, TaskExecutable,
};
pub use types::{
    AsyncExecutableResponse, ChildChainExecutableResponse, ChildExecutableResponse,
    ChildrenExecutableResponse, ResponseData, StepInputPackage, StepResponse, StepStatus,
    TaskRequest,
};
