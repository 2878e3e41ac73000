//! # Lifecycle Events
//!
//! Fire-and-forget notifications about step, constraint and approval
//! lifecycle changes. Event names live in [`crate::constants::events`].

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
