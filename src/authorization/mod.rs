//! # Authorization
//!
//! The gate every step execution passes through before its logic runs, and
//! the client seam to the external access control service.

pub mod gate;
pub mod static_client;

pub use gate::{AccessCheckResult, AccessControlClient, AuthorizationGate, PermissionCheck};
pub use static_client::{Grant, StaticAccessControlClient};
