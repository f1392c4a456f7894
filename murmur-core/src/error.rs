//! Error taxonomy for the cache and dispatch core.
//!
//! Nothing here is fatal. Every failure is local to one operation or one
//! delta, and the event application layer carries on with the next event.

use crate::id::MessageId;

/// Errors returned by `murmur_core` operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The operation needs a cached message and none has this id.
    #[error("message {0} is not cached")]
    NotFound(MessageId),
    /// Negative capacity or age, or an unreadable configuration file.
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),
    /// A delta field could not be interpreted. The rest of the delta, if
    /// any, has been applied.
    #[error("malformed delta: {0}")]
    MalformedDelta(String),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
