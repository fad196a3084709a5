//! Job and task lifecycle management.
//!
//! Owns the per-entity state machines, drives goal states, launches
//! placed tasks (persisting before every outbound call), and reconciles
//! against the master.

pub mod error;
pub mod handlers;
pub mod manager;
pub mod reconciler;
pub mod task;

pub use error::{JobError, JobResult};
pub use handlers::TaskHandlerPool;
pub use manager::JobManager;
pub use reconciler::Reconciler;
