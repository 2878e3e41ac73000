//! # Step Registry
//!
//! Maps step types to their [`Executable`]. Built by explicit wiring at
//! startup and handed to the dispatcher; there is no global instance.

use crate::error::{GatekeeperError, GatekeeperResult};
use crate::execution::traits::{Executable, ExecutionMode};
use dashmap::DashMap;
use tracing::{debug, warn};

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_steps: usize,
    pub step_types: Vec<String>,
}

#[derive(Debug, Default)]
pub struct StepRegistry {
    executables: DashMap<String, Executable>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executable for a step type, replacing any previous one
    pub fn register(&self, step_type: impl Into<String>, executable: Executable) -> GatekeeperResult<()> {
        let step_type = step_type.into();
        if step_type.trim().is_empty() {
            return Err(GatekeeperError::InvalidParameters(
                "step type cannot be empty".to_string(),
            ));
        }

        let mode = executable.mode();
        if self.executables.insert(step_type.clone(), executable).is_some() {
            warn!(step_type = %step_type, "Replacing registered executable");
        }
        debug!(step_type = %step_type, mode = %mode, "Registered executable");
        Ok(())
    }

    pub fn get(&self, step_type: &str) -> GatekeeperResult<Executable> {
        self.executables
            .get(step_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GatekeeperError::StepNotRegistered(step_type.to_string()))
    }

    pub fn mode_of(&self, step_type: &str) -> Option<ExecutionMode> {
        self.executables.get(step_type).map(|entry| entry.mode())
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.executables.contains_key(step_type)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut step_types: Vec<String> = self
            .executables
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        step_types.sort();
        RegistryStats {
            total_steps: step_types.len(),
            step_types,
        }
    }
}
