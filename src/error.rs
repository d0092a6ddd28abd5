//! Session error types

use std::fmt;

/// Errors that can occur during session operations
///
/// Only genuine backend failures surface here. Lock contention, missing
/// sessions, expired sessions and stale lock tokens are all ordinary
/// outcomes and are reported as values, never as errors.
#[derive(Debug)]
pub enum SessionError {
    /// The backing store could not be reached or the operation failed
    StoreUnavailable(String),
    /// A stored record could not be encoded or decoded
    Serialization(String),
    /// Redis error (when the redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    Redis(redis::RedisError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::StoreUnavailable(msg) => write!(f, "Session store unavailable: {}", msg),
            SessionError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            #[cfg(feature = "redis-store")]
            SessionError::Redis(e) => write!(f, "Redis error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for SessionError {
    fn from(err: redis::RedisError) -> Self {
        SessionError::Redis(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
