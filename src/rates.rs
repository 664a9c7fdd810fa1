//! Rate specifications: how often a caller is allowed through.

use rand::Rng;
use std::time::Duration;

use crate::error::ThrottleError;

/// An allowed request cadence.
///
/// A rate is immutable once built. [`RateSpec::interval`] is the only thing
/// limiters ask of it, and it is safe to call from any number of tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateSpec {
    /// `n_requests` per window, evenly spaced.
    Constant(ConstantRate),
    /// Between `min_n_requests` and `max_n_requests` per window, with a fresh
    /// uniformly drawn spacing for every caller.
    Variable(VariableRate),
}

impl RateSpec {
    /// Shorthand for [`ConstantRate::new`].
    pub fn constant(n_requests: u32, per: Duration) -> Result<Self, ThrottleError> {
        ConstantRate::new(n_requests, per).map(Self::Constant)
    }

    /// Shorthand for [`VariableRate::new`].
    pub fn variable(
        min_n_requests: u32,
        max_n_requests: u32,
        per: Duration,
    ) -> Result<Self, ThrottleError> {
        VariableRate::new(min_n_requests, max_n_requests, per).map(Self::Variable)
    }

    /// The delay the next caller must leave after the previous one.
    ///
    /// Variable rates draw a new value on every call.
    pub fn interval(&self) -> Duration {
        match self {
            Self::Constant(rate) => rate.sleep_interval(),
            Self::Variable(rate) => rate.draw(),
        }
    }

    /// The longest interval this rate can ever produce.
    pub fn longest_interval(&self) -> Duration {
        match self {
            Self::Constant(rate) => rate.sleep_interval(),
            Self::Variable(rate) => rate.max_interval(),
        }
    }
}

impl From<ConstantRate> for RateSpec {
    fn from(rate: ConstantRate) -> Self {
        Self::Constant(rate)
    }
}

impl From<VariableRate> for RateSpec {
    fn from(rate: VariableRate) -> Self {
        Self::Variable(rate)
    }
}

/// A fixed cadence of `n_requests` per `per`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantRate {
    n_requests: u32,
    per: Duration,
}

impl ConstantRate {
    /// Create a constant rate.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::InvalidRate`] if `n_requests` is 0, `per` is
    /// zero, or `per` exceeds `u64::MAX` nanoseconds (~585 years).
    pub fn new(n_requests: u32, per: Duration) -> Result<Self, ThrottleError> {
        if n_requests == 0 {
            return Err(ThrottleError::InvalidRate(
                "n_requests must be greater than 0".to_string(),
            ));
        }
        validate_window(per)?;
        Ok(Self { n_requests, per })
    }

    pub fn n_requests(&self) -> u32 {
        self.n_requests
    }

    pub fn per(&self) -> Duration {
        self.per
    }

    /// Time between two consecutive callers.
    #[inline]
    pub fn sleep_interval(&self) -> Duration {
        self.per / self.n_requests
    }
}

/// A cadence that varies between two request counts per window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRate {
    min_n_requests: u32,
    max_n_requests: u32,
    per: Duration,
}

impl VariableRate {
    /// Create a variable rate.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::InvalidRate`] if either count is 0, if
    /// `min_n_requests >= max_n_requests`, or if the window is invalid.
    pub fn new(
        min_n_requests: u32,
        max_n_requests: u32,
        per: Duration,
    ) -> Result<Self, ThrottleError> {
        if min_n_requests == 0 {
            return Err(ThrottleError::InvalidRate(
                "min_n_requests must be greater than 0".to_string(),
            ));
        }
        if min_n_requests >= max_n_requests {
            return Err(ThrottleError::InvalidRate(format!(
                "min_n_requests ({min_n_requests}) must be less than \
                 max_n_requests ({max_n_requests})"
            )));
        }
        validate_window(per)?;
        Ok(Self {
            min_n_requests,
            max_n_requests,
            per,
        })
    }

    pub fn min_n_requests(&self) -> u32 {
        self.min_n_requests
    }

    pub fn max_n_requests(&self) -> u32 {
        self.max_n_requests
    }

    pub fn per(&self) -> Duration {
        self.per
    }

    /// Shortest spacing, reached at `max_n_requests` per window.
    pub fn min_interval(&self) -> Duration {
        self.per / self.max_n_requests
    }

    /// Longest spacing, reached at `min_n_requests` per window.
    pub fn max_interval(&self) -> Duration {
        self.per / self.min_n_requests
    }

    fn draw(&self) -> Duration {
        let low = self.min_interval().as_nanos() as u64;
        let high = self.max_interval().as_nanos() as u64;
        Duration::from_nanos(rand::rng().random_range(low..=high))
    }
}

fn validate_window(per: Duration) -> Result<(), ThrottleError> {
    if per.is_zero() {
        return Err(ThrottleError::InvalidRate(
            "window must be greater than 0".to_string(),
        ));
    }
    if per.as_nanos() > u64::MAX as u128 {
        return Err(ThrottleError::InvalidRate(
            "window must not exceed u64::MAX nanoseconds (~585 years)".to_string(),
        ));
    }
    Ok(())
}
