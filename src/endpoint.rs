//! Match rules pairing a URL pattern and optional endpoint id with a limiter.

use regex::Regex;
use std::sync::Arc;

use crate::error::ThrottleError;
use crate::limiter::RateLimiter;

/// How a rule recognizes the URLs it throttles.
#[derive(Debug, Clone)]
pub enum MatchPattern {
    /// Matches when the string occurs anywhere in the URL.
    Substring(String),
    /// Matches when the expression finds a match anywhere in the URL.
    Regex(Regex),
}

impl MatchPattern {
    pub fn substring(pattern: impl Into<String>) -> Self {
        Self::Substring(pattern.into())
    }

    /// Compile a regular-expression pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::InvalidPattern`] if `pattern` does not compile.
    pub fn regex(pattern: &str) -> Result<Self, ThrottleError> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// Check if this pattern matches a URL.
    #[inline]
    pub fn is_match(&self, url: &str) -> bool {
        match self {
            Self::Substring(needle) => url.contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(url),
        }
    }

    /// The literal substring or the expression source.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Substring(needle) => needle,
            Self::Regex(regex) => regex.as_str(),
        }
    }
}

impl From<&str> for MatchPattern {
    fn from(pattern: &str) -> Self {
        Self::substring(pattern)
    }
}

impl From<String> for MatchPattern {
    fn from(pattern: String) -> Self {
        Self::Substring(pattern)
    }
}

impl From<Regex> for MatchPattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

/// A [`RateLimiter`] applied to requests matching a pattern and, optionally,
/// one endpoint id.
///
/// A rule without an endpoint id is a wildcard: it matches every endpoint id,
/// including none, and all of those callers share its limiter.
#[derive(Debug, Clone)]
pub struct EndpointRateLimiter {
    limiter: Arc<RateLimiter>,
    pattern: MatchPattern,
    endpoint_id: Option<String>,
}

impl EndpointRateLimiter {
    pub fn new(limiter: impl Into<Arc<RateLimiter>>, pattern: impl Into<MatchPattern>) -> Self {
        Self {
            limiter: limiter.into(),
            pattern: pattern.into(),
            endpoint_id: None,
        }
    }

    /// Restrict this rule to requests carrying exactly `endpoint_id`.
    #[must_use]
    pub fn with_endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn pattern(&self) -> &MatchPattern {
        &self.pattern
    }

    pub fn endpoint_id(&self) -> Option<&str> {
        self.endpoint_id.as_deref()
    }

    /// Returns `true` if this rule applies to every endpoint id.
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.endpoint_id.is_none()
    }

    /// Check if this rule applies to a request.
    #[inline]
    pub fn matches(&self, url: &str, endpoint_id: Option<&str>) -> bool {
        if let Some(ref required) = self.endpoint_id {
            if endpoint_id != Some(required.as_str()) {
                return false;
            }
        }
        self.pattern.is_match(url)
    }
}
