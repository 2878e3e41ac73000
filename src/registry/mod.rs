//! # Registry Infrastructure
//!
//! Lookup of step implementations by step type.

pub mod step_registry;

pub use step_registry::{RegistryStats, StepRegistry};
