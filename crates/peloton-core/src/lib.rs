//! Shared types for the Peloton scheduling substrate.
//!
//! This crate holds the vocabulary the other crates speak: resource
//! vectors, task demands and placement constraints, the Mesos task-id
//! naming scheme, daemon configuration, and the retry/backoff helper.

pub mod config;
pub mod resources;
pub mod retry;
pub mod types;

pub use config::{Config, ConfigError, FrameworkConfig, SchedulingConfig, StorageConfig, TransportConfig};
pub use resources::ResourceVector;
pub use retry::Backoff;
pub use types::{
    mesos_task_id, parse_mesos_task_id, PlacementConstraints, TaskDemand, TaskKey,
};
