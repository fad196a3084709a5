//! Job manager error types.

use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("state store error: {0}")]
    Store(#[from] peloton_state::StateError),

    #[error("driver error: {0}")]
    Driver(#[from] peloton_driver::DriverError),

    #[error("resource pool error: {0}")]
    Respool(#[from] peloton_respool::RespoolError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
