//! # Resource Constraints
//!
//! Named, scoped, capacity-bounded admission with FIFO fairness.
//!
//! - [`lane`]: the admission algorithm for one constraint key
//! - [`store`]: key-scoped atomic storage of lanes
//! - [`queue`]: the service steps call to acquire and release

pub mod lane;
pub mod queue;
pub mod store;

pub use lane::{AcquireOutcome, AcquireRequest, Lane, LaneChange, LaneOperation};
pub use queue::{grant_outputs, ResourceConstraintQueue};
pub use store::{ConstraintStore, InMemoryConstraintStore};
