//! Offer manager error types.

use thiserror::Error;

pub type OfferResult<T> = Result<T, OfferError>;

#[derive(Debug, Error)]
pub enum OfferError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("offer no longer held: {0}")]
    OfferGone(String),

    #[error("claim not found: {0}")]
    ClaimNotFound(u64),
}
