//! The in-process rates controller.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::builder::ControllerBuilder;
use crate::endpoint::{EndpointRateLimiter, MatchPattern};
use crate::limiter::RateLimiter;
use crate::rates::RateSpec;

/// How a default limit is tracked across endpoint ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointPartitioning {
    /// One default limiter shared by every caller.
    #[default]
    Shared,
    /// A separate default limiter for each endpoint id, created the first
    /// time that id is seen. Requests without an endpoint id share one.
    PerEndpoint,
}

/// Applies every matching [`EndpointRateLimiter`] to a request, falling back
/// to a default rate.
///
/// Resolution for `(url, endpoint_id)`:
///
/// 1. Every rule whose pattern matches `url` and whose endpoint id is unset or
///    equal to `endpoint_id` applies.
/// 2. With [`EndpointPartitioning::PerEndpoint`], a request carrying an
///    endpoint id that no endpoint-specific rule matched also goes through
///    that id's own default limiter.
/// 3. Otherwise, if nothing matched, the shared default limiter applies.
///
/// Each applicable limiter reserves its own slot and the caller waits once
/// for the longest of those waits.
///
/// # Thread Safety
///
/// `RatesController` is `Send + Sync`. Clones share the same limiter state,
/// so limits are enforced across all clones.
#[derive(Debug, Clone)]
pub struct RatesController {
    pub(crate) rules: Arc<Vec<EndpointRateLimiter>>,
    pub(crate) default_rate: Option<RateSpec>,
    pub(crate) default_limiter: Option<Arc<RateLimiter>>,
    pub(crate) partitioning: EndpointPartitioning,
    pub(crate) partitions: Arc<DashMap<String, Arc<RateLimiter>>>,
}

impl RatesController {
    /// Create a new builder for configuring the controller.
    #[must_use]
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    /// Create a controller from already-built rules.
    #[must_use]
    pub fn new(
        rules: Vec<EndpointRateLimiter>,
        default_rate: Option<RateSpec>,
        partitioning: EndpointPartitioning,
    ) -> Self {
        Self {
            rules: Arc::new(rules),
            default_limiter: default_rate
                .clone()
                .map(|rate| Arc::new(RateLimiter::new(rate))),
            default_rate,
            partitioning,
            partitions: Arc::new(DashMap::new()),
        }
    }

    /// Create a controller with a single rule and no default.
    #[must_use]
    pub fn from_endpoint_rate_limiter(
        rate: RateSpec,
        pattern: impl Into<MatchPattern>,
        endpoint_id: Option<&str>,
    ) -> Self {
        let mut rule = EndpointRateLimiter::new(RateLimiter::new(rate), pattern);
        if let Some(endpoint_id) = endpoint_id {
            rule = rule.with_endpoint_id(endpoint_id);
        }
        Self::new(vec![rule], None, EndpointPartitioning::Shared)
    }

    pub fn rules(&self) -> &[EndpointRateLimiter] {
        &self.rules
    }

    pub fn partitioning(&self) -> EndpointPartitioning {
        self.partitioning
    }

    /// Wait until every limiter applicable to the request allows it, and
    /// return how long the caller waited.
    pub async fn maybe_sleep(&self, url: &str, endpoint_id: Option<&str>) -> Duration {
        let wait = self.reserve(url, endpoint_id);
        if !wait.is_zero() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                url,
                endpoint_id,
                wait_ms = wait.as_millis() as u64,
                "delaying request"
            );
            sleep(wait).await;
        }
        wait
    }

    /// Reserve a slot on every applicable limiter without sleeping and return
    /// the longest wait among them.
    pub fn reserve(&self, url: &str, endpoint_id: Option<&str>) -> Duration {
        self.resolve(url, endpoint_id)
            .iter()
            .map(|limiter| limiter.reserve())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Hold back every limiter applicable to the request for `duration`.
    pub fn pause(&self, url: &str, endpoint_id: Option<&str>, duration: Duration) {
        for limiter in self.resolve(url, endpoint_id) {
            limiter.pause(duration);
        }
    }

    /// Remove per-endpoint default limiters that are idle and not in use.
    ///
    /// A removed partition is recreated on the next request for its endpoint
    /// id, and an idle limiter admits its next caller immediately, so cleanup
    /// never changes observable timing. Call periodically in long-running
    /// applications that see an unbounded set of endpoint ids.
    pub fn cleanup(&self) {
        self.partitions
            .retain(|_, limiter| Arc::strong_count(limiter) > 1 || !limiter.is_idle());
    }

    /// Returns the number of per-endpoint default limiters.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn resolve(&self, url: &str, endpoint_id: Option<&str>) -> Vec<Arc<RateLimiter>> {
        let mut matched = Vec::new();
        let mut endpoint_specific = false;

        for rule in self.rules.iter() {
            if rule.matches(url, endpoint_id) {
                endpoint_specific |= !rule.is_wildcard();
                matched.push(rule.limiter().clone());
            }
        }

        if let Some(ref rate) = self.default_rate {
            match (self.partitioning, endpoint_id) {
                (EndpointPartitioning::PerEndpoint, Some(id)) if !endpoint_specific => {
                    matched.push(self.partition(id, rate));
                }
                _ if matched.is_empty() => {
                    if let Some(ref limiter) = self.default_limiter {
                        matched.push(limiter.clone());
                    }
                }
                _ => {}
            }
        }

        matched
    }

    fn partition(&self, endpoint_id: &str, rate: &RateSpec) -> Arc<RateLimiter> {
        if let Some(limiter) = self.partitions.get(endpoint_id) {
            return limiter.clone();
        }

        self.partitions
            .entry(endpoint_id.to_string())
            .or_insert_with(|| {
                #[cfg(feature = "tracing")]
                tracing::debug!(endpoint_id, "creating default limiter for endpoint");
                Arc::new(RateLimiter::new(rate.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    const TDA_CHAINS: &str = "https://api.tdameritrade.com/v1/marketdata/chains";

    fn per_second(n: u32) -> RateSpec {
        RateSpec::constant(n, Duration::from_secs(1)).unwrap()
    }

    /// Issue `n` concurrent requests and return when each finished, sorted.
    async fn finish_times(
        controller: &RatesController,
        url: &str,
        endpoint_id: Option<&str>,
        n: usize,
    ) -> Vec<Instant> {
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let controller = controller.clone();
                let url = url.to_string();
                let endpoint_id = endpoint_id.map(str::to_string);
                tokio::spawn(async move {
                    controller.maybe_sleep(&url, endpoint_id.as_deref()).await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::with_capacity(n);
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();
        times
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_substring() {
        let controller =
            RatesController::from_endpoint_rate_limiter(per_second(10), "www.google.com", None);

        let start = Instant::now();
        let times = finish_times(&controller, "https://www.google.com/some/path", None, 4).await;

        assert_eq!(times[0], start);
        assert!(gaps(&times).iter().all(|gap| *gap == Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regex_target() {
        let pattern = MatchPattern::regex(r"www\.test\.com/api_v[1-2]/").unwrap();
        let controller = RatesController::from_endpoint_rate_limiter(per_second(20), pattern, None);

        let times = finish_times(&controller, "https://www.test.com/api_v1/stuff", None, 4).await;
        assert!(gaps(&times).iter().all(|gap| *gap == Duration::from_millis(50)));

        // api_v3 is not covered by the rule.
        let start = Instant::now();
        let times = finish_times(&controller, "https://www.test.com/api_v3/stuff", None, 4).await;
        assert!(times.iter().all(|t| *t == start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_endpoint_id() {
        let controller =
            RatesController::from_endpoint_rate_limiter(per_second(10), TDA_CHAINS, Some("TSLA"));

        let times = finish_times(&controller, TDA_CHAINS, Some("TSLA"), 4).await;
        assert!(gaps(&times).iter().all(|gap| *gap == Duration::from_millis(100)));

        let start = Instant::now();
        let times = finish_times(&controller, TDA_CHAINS, Some("SPY"), 4).await;
        assert!(times.iter().all(|t| *t == start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_default_spans_urls() {
        let controller =
            RatesController::new(vec![], Some(per_second(10)), EndpointPartitioning::Shared);

        let mut all = finish_times(&controller, "https://one.example/", None, 4).await;
        all.extend(finish_times(&controller, "https://two.example/", None, 4).await);

        assert!(gaps(&all).iter().all(|gap| *gap == Duration::from_millis(100)));
        assert_eq!(controller.partition_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_default_ignores_endpoint_ids() {
        let controller =
            RatesController::new(vec![], Some(per_second(10)), EndpointPartitioning::Shared);

        let waits: Vec<Duration> = ["a", "b", "c"]
            .iter()
            .map(|id| controller.reserve("https://x.example/", Some(id)))
            .collect();
        assert_eq!(
            waits,
            vec![Duration::ZERO, Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_all_matched() {
        let controller = RatesController::new(
            vec![
                EndpointRateLimiter::new(RateLimiter::new(per_second(10)), TDA_CHAINS),
                EndpointRateLimiter::new(RateLimiter::new(per_second(5)), TDA_CHAINS)
                    .with_endpoint_id("TSLA"),
            ],
            None,
            EndpointPartitioning::Shared,
        );

        let start = Instant::now();
        let times = finish_times(&controller, TDA_CHAINS, Some("TSLA"), 4).await;

        // The slower rule binds; waits are not summed.
        assert_eq!(times[0], start);
        assert_eq!(gaps(&times), vec![Duration::from_millis(200); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_endpoint_id() {
        let controller = RatesController::new(
            vec![EndpointRateLimiter::new(
                RateLimiter::new(per_second(100)),
                "https://api.tdameritrade.com",
            )],
            Some(per_second(10)),
            EndpointPartitioning::PerEndpoint,
        );
        let endpoint_ids: Vec<String> = (0..5).map(|i| format!("symbol-{i}")).collect();

        async fn round(controller: &RatesController, endpoint_ids: &[String]) -> Vec<Instant> {
            let handles: Vec<_> = endpoint_ids
                .iter()
                .map(|id| {
                    let controller = controller.clone();
                    let id = id.clone();
                    tokio::spawn(async move {
                        controller.maybe_sleep(TDA_CHAINS, Some(&id)).await;
                        Instant::now()
                    })
                })
                .collect();
            let mut times = Vec::new();
            for handle in handles {
                times.push(handle.await.unwrap());
            }
            times.sort();
            times
        }

        // First sighting of each id: only the domain rule spaces the requests.
        let start = Instant::now();
        let first = round(&controller, &endpoint_ids).await;
        assert_eq!(first[0], start);
        assert_eq!(gaps(&first), vec![Duration::from_millis(10); 4]);
        assert_eq!(controller.partition_count(), 5);

        // Second sighting: each id's own default binds, and distinct ids run
        // side by side rather than queueing behind each other.
        let second = round(&controller, &endpoint_ids).await;
        assert!(second.iter().all(|t| *t == start + Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_skipped_when_rule_matches() {
        let controller = RatesController::new(
            vec![EndpointRateLimiter::new(
                RateLimiter::new(per_second(100)),
                "/api_v1/",
            )],
            Some(per_second(1)),
            EndpointPartitioning::Shared,
        );

        assert_eq!(controller.reserve("https://x.example/api_v1/a", None), Duration::ZERO);
        assert_eq!(
            controller.reserve("https://x.example/api_v1/a", None),
            Duration::from_millis(10)
        );
        // The default only governs requests no rule matched.
        assert_eq!(controller.reserve("https://x.example/api_v3/a", None), Duration::ZERO);
        assert_eq!(
            controller.reserve("https://x.example/api_v3/a", None),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_no_rules_no_default_is_noop() {
        let controller = RatesController::builder().build().unwrap();
        for _ in 0..3 {
            assert_eq!(controller.reserve("https://x.example/", Some("id")), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_reaches_matched_limiters() {
        let controller =
            RatesController::from_endpoint_rate_limiter(per_second(250), "www.google.com", None);
        controller.pause("https://www.google.com/", None, Duration::from_secs(2));

        let before = Instant::now();
        controller.maybe_sleep("https://www.google.com/", None).await;
        assert!(before.elapsed() > Duration::from_millis(1950));

        // Unrelated URLs are not paused.
        assert_eq!(controller.reserve("https://www.bing.com/", None), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_idle_partitions() {
        let controller =
            RatesController::new(vec![], Some(per_second(10)), EndpointPartitioning::PerEndpoint);

        controller.reserve("https://x.example/", Some("a"));
        controller.reserve("https://x.example/", Some("b"));
        assert_eq!(controller.partition_count(), 2);

        // Still inside their intervals.
        controller.cleanup();
        assert_eq!(controller.partition_count(), 2);

        tokio::time::advance(Duration::from_millis(100)).await;
        controller.reserve("https://x.example/", Some("a"));
        controller.cleanup();
        assert_eq!(controller.partition_count(), 1);
        assert!(controller.partitions.contains_key("a"));
    }
}
