//! # Gatekeeper Configuration System
//!
//! YAML-based configuration with environment overrides. Every section has a
//! usable `Default`, so embedding the core without a configuration file works;
//! a loaded file is validated before use.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gatekeeper_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let default_timeout = &manager.config().approvals.default_timeout;
//! let sweep_every = manager.config().approvals.sweep_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{
    DEFAULT_APPROVAL_TIMEOUT, DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_ITERATION_INTERVAL_MS,
    DEFAULT_MAX_PERMITS, DEFAULT_SWEEP_BATCH_SIZE, DEFAULT_SWEEP_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring gatekeeper-config.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Authorization gate settings
    pub auth: AuthConfig,

    /// Approval deadlines and sweeping
    pub approvals: ApprovalConfig,

    /// Resource constraint limits
    pub constraints: ConstraintConfig,

    /// Lifecycle event publishing
    pub events: EventsConfig,

    /// Postgres persistence
    pub database: DatabaseConfig,
}

/// Authorization gate configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When false every step is allowed without asking the access control client
    pub enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Approval instance configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Timeout applied when a step declares none, e.g. "7d"
    pub default_timeout: String,
    pub sweep_interval_ms: u64,
    pub iteration_interval_ms: i64,
    pub sweep_batch_size: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_APPROVAL_TIMEOUT.to_string(),
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            iteration_interval_ms: DEFAULT_ITERATION_INTERVAL_MS,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl ApprovalConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Resource constraint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConstraintConfig {
    /// Largest `permits` value accepted on a restraint
    pub max_permits: u32,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            max_permits: DEFAULT_MAX_PERMITS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Database configuration for the Postgres stores
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL, `${VAR}` references are expanded at load time
    pub url: Option<String>,
    pub pool: u32,
    pub connect_timeout_seconds: u64,
    /// Run embedded migrations when the pool is created
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Some("${DATABASE_URL}".to_string()),
            pool: 10,
            connect_timeout_seconds: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    /// Resolved database URL, if one is configured
    pub fn database_url(&self) -> Option<String> {
        let url = self.url.as_ref()?;
        if let Some(var_name) = url.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            return std::env::var(var_name).ok();
        }
        if url.is_empty() {
            None
        } else {
            Some(url.clone())
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl GatekeeperConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Err(err) = crate::approvals::timeout::parse_duration_millis(&self.approvals.default_timeout)
        {
            return Err(ConfigurationError::invalid_value(
                "approvals.default_timeout",
                self.approvals.default_timeout.clone(),
                err.to_string(),
            ));
        }

        if self.approvals.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "approvals.sweep_interval_ms",
                "0",
                "sweep interval must be greater than 0",
            ));
        }

        if self.approvals.iteration_interval_ms <= 0 {
            return Err(ConfigurationError::invalid_value(
                "approvals.iteration_interval_ms",
                self.approvals.iteration_interval_ms.to_string(),
                "iteration interval must be greater than 0",
            ));
        }

        if self.approvals.sweep_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "approvals.sweep_batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if self.constraints.max_permits == 0 {
            return Err(ConfigurationError::invalid_value(
                "constraints.max_permits",
                "0",
                "at least one permit must be allowed",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "channel capacity must be greater than 0",
            ));
        }

        if self.database.pool == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.pool",
                "0",
                "pool size must be greater than 0",
            ));
        }

        Ok(())
    }
}
