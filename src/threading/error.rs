//! Errors surfaced by a threading pass
//!
//! Malformed references, duplicate ids and cycle attempts are resolved inside
//! the threader and only logged. What remains here is what a caller has to act on.

use thiserror::Error;

use super::cache::IndexError;
use super::overrides::OverrideError;

#[derive(Debug, Error)]
pub enum ThreadingError {
    /// The durable index or override ledger could not be used. Threading can
    /// continue in memory for the session.
    #[error("thread storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A copy override would make `child` its own ancestor
    #[error("pasting {child} under {parent} would create a loop")]
    LoopRequestedByOverride { child: String, parent: String },

    #[error("threading pass cancelled")]
    Cancelled,

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("invalid account name: {0:?}")]
    InvalidAccount(String),
}

impl From<IndexError> for ThreadingError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidAccount(account) => ThreadingError::InvalidAccount(account),
            other => ThreadingError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<OverrideError> for ThreadingError {
    fn from(err: OverrideError) -> Self {
        ThreadingError::StorageUnavailable(err.to_string())
    }
}
