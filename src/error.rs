//! Error types for throttling.

use thiserror::Error;

/// Errors that can occur while configuring or applying throttles.
///
/// Local throttling never fails at request time; contention only produces
/// longer waits. Request-time errors come from the distributed limiter's
/// shared store and are all retryable.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// A rate was configured with invalid parameters.
    #[error("invalid rate: {0}")]
    InvalidRate(String),

    /// A regular-expression match rule failed to compile.
    #[error("invalid match pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A rule was configured without the parts it needs.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// A host could not be extracted from the request URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The Redis store could not be reached or returned an error.
    #[cfg(feature = "redis")]
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A custom store backend reported a failure.
    #[error("store backend error: {0}")]
    Backend(String),

    /// Every optimistic update attempt lost the race against another writer.
    #[error("gave up on {key} after {attempts} conflicting updates")]
    RetriesExhausted { key: String, attempts: u32 },
}

impl ThrottleError {
    /// Returns `true` if the operation may succeed when tried again.
    ///
    /// Configuration errors are never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            Self::Store(_) => true,
            Self::Backend(_) | Self::RetriesExhausted { .. } => true,
            Self::InvalidRate(_)
            | Self::InvalidPattern(_)
            | Self::InvalidRule(_)
            | Self::InvalidUrl(_) => false,
        }
    }
}

impl From<ThrottleError> for reqwest_middleware::Error {
    fn from(err: ThrottleError) -> Self {
        reqwest_middleware::Error::Middleware(err.into())
    }
}
