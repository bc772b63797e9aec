//! Shared types for the pipeline control plane: nodes, config and events.
//!
//! These mirror the data model used by every other crate in this
//! workspace so that the scheduler, reconciler and ingester agree on a
//! single vocabulary for nodes, jobs, platforms and runtimes.

pub mod config;
pub mod event;
pub mod types;

pub use config::{Config, ConfigError};
pub use event::{Event, EventData};
pub use types::{Id, KernelRevision, Node, NodeKind, NodeResult, NodeState};
