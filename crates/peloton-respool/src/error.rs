//! Resource-pool engine error types.

use thiserror::Error;

pub type RespoolResult<T> = Result<T, RespoolError>;

#[derive(Debug, Error)]
pub enum RespoolError {
    #[error("unknown pool: {0}")]
    UnknownPool(String),

    #[error("duplicate pool id: {0}")]
    DuplicatePool(String),

    #[error("pool {pool} references missing parent {parent}")]
    MissingParent { pool: String, parent: String },

    #[error("pool {0} is not reachable from the root (cycle or orphan)")]
    Unreachable(String),

    #[error("pool {0}: reservation exceeds limit")]
    ReservationExceedsLimit(String),

    #[error("pool {0}: children's reservations exceed the pool's own reservation")]
    ChildReservationsExceedParent(String),

    #[error("pool id {0:?} is reserved for the virtual root")]
    ReservedId(String),
}
