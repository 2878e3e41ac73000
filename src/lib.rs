#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Gatekeeper Core
//!
//! Step-execution coordination core for a pipeline orchestrator.
//!
//! ## Overview
//!
//! The orchestrator owns the pipeline graph and decides which node runs next.
//! This crate owns what happens at the boundary of a single step:
//!
//! - **Authorization gate**: every step is checked against the access control
//!   service before any of its logic runs
//! - **Executable contract**: six execution shapes (sync, async, task, child,
//!   child chain, children) that a step implements, driven by one dispatcher
//! - **Resource constraint queue**: named, scoped, capacity-bounded admission
//!   with strict FIFO (ENSURE) or capacity-only (BEST_EFFORT) ordering
//! - **Approval state machine**: approval instances that hold a step until an
//!   explicit decision or their deadline
//!
//! Suspended steps are woken through an [`execution::OrchestratorCallback`]
//! that the embedding orchestrator implements.
//!
//! ## Module Organization
//!
//! - [`models`] - shared data types
//! - [`authorization`] - gate and access control client seam
//! - [`execution`] - executable traits, continuations and the dispatcher
//! - [`constraints`] - lanes, lane storage and the constraint queue
//! - [`approvals`] - approval service, storage, timeouts and the sweeper
//! - [`steps`] - built-in resource restraint and approval steps
//! - [`state_machine`] - approval and consumer status transitions
//! - [`database`] - Postgres stores and migrations
//! - [`config`] - YAML configuration with environment overrides
//! - [`events`] - lifecycle event broadcasting
//! - [`bootstrap`] - wiring everything together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatekeeper_core::authorization::StaticAccessControlClient;
//! use gatekeeper_core::config::{ConfigManager, GatekeeperConfig};
//! use gatekeeper_core::bootstrap::GatekeeperCore;
//! use gatekeeper_core::execution::ChannelCallback;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::from_config(GatekeeperConfig::default(), "development")?;
//! let (callback, _signals) = ChannelCallback::channel();
//!
//! let core = GatekeeperCore::in_memory(
//!     config,
//!     Arc::new(StaticAccessControlClient::new()),
//!     Arc::new(callback),
//! )?;
//! assert!(core.registry.contains("Queue"));
//! # Ok(())
//! # }
//! ```

pub mod approvals;
pub mod authorization;
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod constraints;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod models;
pub mod registry;
pub mod state_machine;
pub mod steps;
pub mod utils;

pub use config::{ConfigManager, GatekeeperConfig};
pub use error::{GatekeeperError, GatekeeperResult};
pub use execution::{DispatchOutcome, StepDispatcher};
pub use models::{ExecutionContext, StepParameters};

// Re-export constants events with a distinct name to avoid clashing with the
// events module
pub use constants::events as lifecycle_events;
