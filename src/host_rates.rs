//! Per-host rate bundles for the distributed limiter.

use regex::Regex;

use crate::error::ThrottleError;
use crate::rates::RateSpec;

/// Rates for one host: URL-substring rules, pattern rules and a host default.
///
/// Rules are checked in the order they were added. URL-substring rules are
/// checked before pattern rules, and the host default applies only when
/// neither matched.
///
/// # Example
///
/// ```rust
/// use host_throttle::{HostRates, RateSpec};
/// use std::time::Duration;
///
/// let rates = HostRates::new("test.com")
///     .url_rate("test.com/api", RateSpec::constant(5, Duration::from_secs(1))?)
///     .pattern_rate(r"/api_v[1-2]/", RateSpec::constant(2, Duration::from_secs(1))?)?
///     .default_rate(RateSpec::constant(10, Duration::from_secs(1))?);
/// assert_eq!(rates.host(), "test.com");
/// # Ok::<(), host_throttle::ThrottleError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HostRates {
    host: String,
    url_rates: Vec<(String, RateSpec)>,
    pattern_rates: Vec<(Regex, RateSpec)>,
    default_rate: Option<RateSpec>,
}

/// The rule within a [`HostRates`] bundle that governs a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRule<'a> {
    /// A URL-substring rule, identified by its substring.
    Url(&'a str),
    /// A pattern rule, identified by its expression source.
    Pattern(&'a str),
    /// The host default.
    Default,
}

impl HostRates {
    /// Create an empty bundle for `host`.
    ///
    /// The bundle also covers subdomains of `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            url_rates: Vec::new(),
            pattern_rates: Vec::new(),
            default_rate: None,
        }
    }

    /// Throttle URLs containing `substring` at `rate`.
    #[must_use]
    pub fn url_rate(mut self, substring: impl Into<String>, rate: RateSpec) -> Self {
        self.url_rates.push((substring.into(), rate));
        self
    }

    /// Throttle URLs in which the regular expression `pattern` finds a match.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::InvalidPattern`] if `pattern` does not compile.
    pub fn pattern_rate(mut self, pattern: &str, rate: RateSpec) -> Result<Self, ThrottleError> {
        self.pattern_rates.push((Regex::new(pattern)?, rate));
        Ok(self)
    }

    /// Throttle every other URL of this host at `rate`.
    #[must_use]
    pub fn default_rate(mut self, rate: RateSpec) -> Self {
        self.default_rate = Some(rate);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Find the rule governing `url`, or `None` to fall through to the
    /// limiter-wide default.
    pub fn resolve(&self, url: &str) -> Option<(HostRule<'_>, &RateSpec)> {
        if let Some((substring, rate)) = self
            .url_rates
            .iter()
            .find(|(substring, _)| url.contains(substring.as_str()))
        {
            return Some((HostRule::Url(substring), rate));
        }

        if let Some((regex, rate)) = self
            .pattern_rates
            .iter()
            .find(|(regex, _)| regex.is_match(url))
        {
            return Some((HostRule::Pattern(regex.as_str()), rate));
        }

        self.default_rate
            .as_ref()
            .map(|rate| (HostRule::Default, rate))
    }
}
