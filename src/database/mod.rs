//! # Database Operations
//!
//! Postgres persistence for constraint lanes and approval instances.
//!
//! ## Key Components
//!
//! - [`connection`] - pool creation from [`crate::config::DatabaseConfig`]
//! - [`migrations`] - embedded schema migrations
//! - [`constraint_store`] - lanes serialized by a transaction-scoped advisory lock
//! - [`approval_store`] - approval instances with versioned compare-and-set
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use gatekeeper_core::config::ConfigManager;
//! use gatekeeper_core::database::{DatabaseConnection, DatabaseMigrations, PgApprovalStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let db = DatabaseConnection::connect(&manager.config().database).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//!
//! let approvals = PgApprovalStore::new(db.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod approval_store;
pub mod connection;
pub mod constraint_store;
pub mod migrations;

pub use approval_store::PgApprovalStore;
pub use connection::DatabaseConnection;
pub use constraint_store::PgConstraintStore;
pub use migrations::{migrator, DatabaseMigrations};
