//! Driver error types.

use std::time::Duration;

use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("not subscribed to a master")]
    NotSubscribed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("master rejected request: status {status}: {message}")]
    Master { status: u16, message: String },

    #[error("subscribe response missing Mesos-Stream-Id header")]
    MissingStreamId,

    #[error("codec error: {0}")]
    Codec(#[from] peloton_mesos::CodecError),

    #[error("state store error: {0}")]
    Store(#[from] peloton_state::StateError),
}

impl DriverError {
    /// A 4xx other than 401 means the master will never accept this
    /// request as-is; the supervisor must treat it as fatal. 401 may be a
    /// transient credential propagation issue and is retried up to the
    /// supervisor's budget.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Master { status, .. } if (400..500).contains(status) && *status != 401
        )
    }

    /// Retriable with backoff at the driver level: network failures and
    /// timeouts. Whether a specific call may actually be resent is decided
    /// by `Call::is_idempotent`.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DriverError::Transport(_) | DriverError::Timeout(_)
        ) || matches!(self, DriverError::Master { status, .. } if *status == 401 || *status >= 500)
    }
}
