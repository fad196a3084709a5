//! Resource-pool engine: maintains the pool tree, computes per-pool
//! entitlements, admits or queues task demands, and selects preemption
//! victims.

pub mod capacity;
pub mod engine;
pub mod entitlement;
pub mod error;
pub mod tree;

pub use capacity::CapacityTracker;
pub use engine::{AllocationEntry, PreemptionVictim, RespoolEngine};
pub use error::{RespoolError, RespoolResult};
pub use tree::{PoolNode, PoolTree, ROOT_POOL};
