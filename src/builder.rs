//! Builder API for configuring a [`RatesController`].

use std::time::Duration;

use crate::controller::{EndpointPartitioning, RatesController};
use crate::endpoint::{EndpointRateLimiter, MatchPattern};
use crate::error::ThrottleError;
use crate::limiter::RateLimiter;
use crate::rates::RateSpec;

/// Builder for configuring a [`RatesController`].
///
/// Invalid rates or patterns are collected while building and reported by
/// [`ControllerBuilder::build`].
#[derive(Debug, Default)]
pub struct ControllerBuilder {
    rules: Vec<Result<EndpointRateLimiter, ThrottleError>>,
    default_rate: Option<Result<RateSpec, ThrottleError>>,
    partitioning: EndpointPartitioning,
}

impl ControllerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule using a closure-based configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use host_throttle::RatesController;
    /// use std::time::Duration;
    ///
    /// let controller = RatesController::builder()
    ///     .rule(|r| r.substring("api.tdameritrade.com").limit(120, Duration::from_secs(60)))
    ///     .rule(|r| {
    ///         r.regex(r"/marketdata/[^/]+/quotes")
    ///             .endpoint_id("TSLA")
    ///             .limit(2, Duration::from_secs(1))
    ///     })
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(controller.rules().len(), 2);
    /// ```
    #[must_use]
    pub fn rule<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(RuleBuilder) -> RuleBuilder,
    {
        let configured = configure(RuleBuilder::new());
        self.rules.push(configured.into_rule());
        self
    }

    /// Add a pre-configured rule.
    #[must_use]
    pub fn add_rule(mut self, rule: EndpointRateLimiter) -> Self {
        self.rules.push(Ok(rule));
        self
    }

    /// Set the rate applied when no rule matches.
    #[must_use]
    pub fn default_rate(mut self, rate: RateSpec) -> Self {
        self.default_rate = Some(Ok(rate));
        self
    }

    /// Set the default rate as `n_requests` per `per`.
    #[must_use]
    pub fn default_limit(mut self, n_requests: u32, per: Duration) -> Self {
        self.default_rate = Some(RateSpec::constant(n_requests, per));
        self
    }

    /// Choose whether the default rate is shared or tracked per endpoint id.
    #[must_use]
    pub fn partitioning(mut self, partitioning: EndpointPartitioning) -> Self {
        self.partitioning = partitioning;
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error encountered: an invalid rate, a
    /// pattern that does not compile, or a rule missing its pattern or rate.
    ///
    /// # Warnings
    ///
    /// If the `tracing` feature is enabled, this method warns when a wildcard
    /// rule precedes a rule with the same pattern and a concrete endpoint id,
    /// and about rules that repeat the pattern and endpoint id of an earlier
    /// rule. All matching rules apply, so either can only lengthen waits.
    pub fn build(self) -> Result<RatesController, ThrottleError> {
        let rules = self.rules.into_iter().collect::<Result<Vec<_>, _>>()?;
        let default_rate = self.default_rate.transpose()?;

        #[cfg(feature = "tracing")]
        {
            warn_wildcard_rule_order(&rules);
            warn_duplicate_rules(&rules);
        }

        Ok(RatesController::new(rules, default_rate, self.partitioning))
    }
}

/// Emit a warning if a wildcard rule precedes an endpoint-specific rule for
/// the same pattern.
#[cfg(feature = "tracing")]
fn warn_wildcard_rule_order(rules: &[EndpointRateLimiter]) {
    for (wildcard_index, specific_index) in wildcard_order_conflicts(rules) {
        tracing::warn!(
            wildcard_rule_index = wildcard_index,
            specific_rule_index = specific_index,
            pattern = rules[wildcard_index].pattern().as_str(),
            endpoint_id = rules[specific_index].endpoint_id(),
            "Wildcard rule (index {}) precedes rule (index {}) for the same pattern with \
             an endpoint id. Both apply to that endpoint id, so the wildcard also paces \
             requests meant for the specific rule.",
            wildcard_index,
            specific_index
        );
    }
}

/// Pairs each wildcard rule with the first later endpoint-specific rule
/// sharing its pattern.
#[cfg(feature = "tracing")]
fn wildcard_order_conflicts(rules: &[EndpointRateLimiter]) -> Vec<(usize, usize)> {
    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.is_wildcard())
        .filter_map(|(wildcard_index, wildcard)| {
            rules
                .iter()
                .enumerate()
                .skip(wildcard_index + 1)
                .find(|(_, rule)| {
                    !rule.is_wildcard() && rule.pattern().as_str() == wildcard.pattern().as_str()
                })
                .map(|(specific_index, _)| (wildcard_index, specific_index))
        })
        .collect()
}

/// Emit a warning for each rule that duplicates an earlier one.
#[cfg(feature = "tracing")]
fn warn_duplicate_rules(rules: &[EndpointRateLimiter]) {
    for (index, rule) in rules.iter().enumerate() {
        if let Some(earlier) = rules[..index].iter().position(|other| {
            other.pattern().as_str() == rule.pattern().as_str()
                && other.endpoint_id() == rule.endpoint_id()
        }) {
            tracing::warn!(
                rule_index = index,
                earlier_rule_index = earlier,
                pattern = rule.pattern().as_str(),
                "Rule (index {}) repeats the pattern and endpoint id of rule (index {}). \
                 All matching rules apply, so the stricter of the two always wins.",
                index,
                earlier
            );
        }
    }
}

/// Builder for configuring a single rule.
///
/// Created by the [`ControllerBuilder::rule`] closure.
#[derive(Debug, Default)]
pub struct RuleBuilder {
    pattern: Option<Result<MatchPattern, ThrottleError>>,
    rate: Option<Result<RateSpec, ThrottleError>>,
    endpoint_id: Option<String>,
}

impl RuleBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn into_rule(self) -> Result<EndpointRateLimiter, ThrottleError> {
        let pattern = self
            .pattern
            .ok_or_else(|| ThrottleError::InvalidRule("rule must have a match pattern".into()))??;
        let rate = self.rate.ok_or_else(|| {
            ThrottleError::InvalidRule(
                "rule must have a rate configured via .rate() or .limit()".into(),
            )
        })??;

        let rule = EndpointRateLimiter::new(RateLimiter::new(rate), pattern);
        Ok(match self.endpoint_id {
            Some(endpoint_id) => rule.with_endpoint_id(endpoint_id),
            None => rule,
        })
    }

    /// Match URLs containing `pattern`.
    #[must_use]
    pub fn substring(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(Ok(MatchPattern::substring(pattern)));
        self
    }

    /// Match URLs in which the regular expression `pattern` finds a match.
    #[must_use]
    pub fn regex(mut self, pattern: &str) -> Self {
        self.pattern = Some(MatchPattern::regex(pattern));
        self
    }

    /// Match with a pre-built pattern.
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<MatchPattern>) -> Self {
        self.pattern = Some(Ok(pattern.into()));
        self
    }

    /// Only apply to requests carrying this endpoint id.
    #[must_use]
    pub fn endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    /// Set the rate.
    #[must_use]
    pub fn rate(mut self, rate: RateSpec) -> Self {
        self.rate = Some(Ok(rate));
        self
    }

    /// Set the rate as `n_requests` evenly spaced over `per`.
    #[must_use]
    pub fn limit(mut self, n_requests: u32, per: Duration) -> Self {
        self.rate = Some(RateSpec::constant(n_requests, per));
        self
    }

    /// Set a variable rate between `min_n_requests` and `max_n_requests` per `per`.
    #[must_use]
    pub fn variable_limit(
        mut self,
        min_n_requests: u32,
        max_n_requests: u32,
        per: Duration,
    ) -> Self {
        self.rate = Some(RateSpec::variable(min_n_requests, max_n_requests, per));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_api() {
        let controller = RatesController::builder()
            .rule(|r| {
                r.substring("https://api.tdameritrade.com")
                    .limit(120, Duration::from_secs(60))
            })
            .rule(|r| {
                r.regex(r"/v1/marketdata/chains")
                    .endpoint_id("TSLA")
                    .variable_limit(1, 4, Duration::from_secs(1))
            })
            .default_limit(10, Duration::from_secs(1))
            .partitioning(EndpointPartitioning::PerEndpoint)
            .build()
            .unwrap();

        assert_eq!(controller.rules().len(), 2);
        assert!(controller.rules()[0].is_wildcard());
        assert_eq!(controller.rules()[1].endpoint_id(), Some("TSLA"));
        assert!(matches!(
            controller.rules()[1].limiter().rate(),
            RateSpec::Variable(_)
        ));
        assert_eq!(controller.partitioning(), EndpointPartitioning::PerEndpoint);
    }

    #[test]
    fn test_add_prebuilt_rule() {
        let rule = EndpointRateLimiter::new(
            RateLimiter::from_uniform_rate(5, Duration::from_secs(1)).unwrap(),
            "/api",
        );
        let controller = RatesController::builder().add_rule(rule).build().unwrap();
        assert_eq!(controller.rules().len(), 1);
        assert_eq!(controller.partitioning(), EndpointPartitioning::Shared);
    }

    #[test]
    fn test_rule_without_rate_is_rejected() {
        let err = RatesController::builder()
            .rule(|r| r.substring("/test"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("rule must have a rate"));
    }

    #[test]
    fn test_rule_without_pattern_is_rejected() {
        let err = RatesController::builder()
            .rule(|r| r.limit(1, Duration::from_secs(1)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("rule must have a match pattern"));
    }

    #[test]
    fn test_invalid_rate_is_reported_at_build() {
        let err = RatesController::builder()
            .rule(|r| r.substring("/test").limit(0, Duration::from_secs(1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ThrottleError::InvalidRate(_)));

        let err = RatesController::builder()
            .default_limit(1, Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ThrottleError::InvalidRate(_)));
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn test_wildcard_before_specific_rule_is_flagged() {
        let controller = RatesController::builder()
            .rule(|r| r.substring("/v1/marketdata/chains").limit(10, Duration::from_secs(1)))
            .rule(|r| r.substring("/v1/quotes").limit(10, Duration::from_secs(1)))
            .rule(|r| {
                r.substring("/v1/marketdata/chains")
                    .endpoint_id("TSLA")
                    .limit(5, Duration::from_secs(1))
            })
            .rule(|r| {
                r.substring("/v1/marketdata/chains")
                    .endpoint_id("SPY")
                    .limit(5, Duration::from_secs(1))
            })
            .build()
            .unwrap();

        assert_eq!(wildcard_order_conflicts(controller.rules()), vec![(0, 2)]);

        // Specific first, then the wildcard: nothing to flag.
        let reordered = RatesController::builder()
            .rule(|r| {
                r.substring("/v1/marketdata/chains")
                    .endpoint_id("TSLA")
                    .limit(5, Duration::from_secs(1))
            })
            .rule(|r| r.substring("/v1/marketdata/chains").limit(10, Duration::from_secs(1)))
            .build()
            .unwrap();
        assert!(wildcard_order_conflicts(reordered.rules()).is_empty());
    }

    #[test]
    fn test_invalid_regex_is_reported_at_build() {
        let err = RatesController::builder()
            .rule(|r| r.regex(r"(unclosed").limit(1, Duration::from_secs(1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ThrottleError::InvalidPattern(_)));
    }
}
