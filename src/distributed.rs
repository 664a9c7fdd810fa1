//! Rate limits shared by every process that talks to the same store.

use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::controller::EndpointPartitioning;
use crate::cursor::{Cursor, duration_nanos};
use crate::error::ThrottleError;
use crate::host_rates::{HostRates, HostRule};
use crate::rates::RateSpec;
use crate::store::TargetStore;

/// Default number of optimistic update attempts per operation.
pub const DEFAULT_MAX_RETRIES: u32 = 64;

/// How long a store key outlives its last pending deadline.
const RETENTION_SLACK: Duration = Duration::from_secs(1);

/// Per-target rate limits whose state lives in a [`TargetStore`].
///
/// A request URL resolves to one target: the first matching URL-substring
/// rule of its host's [`HostRates`], then the first matching pattern rule,
/// then the host default, then the limiter-wide default. Hosts are looked up
/// by domain suffix, so rates for `test.com` cover `www.test.com`. The
/// limiter-wide default is tracked separately for every host it applies to.
///
/// Each target's cursor is updated with an optimistic read, compute and
/// compare-and-swap loop, so every process sharing the store observes one
/// cadence per target.
#[derive(Debug, Clone)]
pub struct DistTargetRateLimiters {
    hosts: Arc<HashMap<String, HostRates>>,
    default_rate: Option<RateSpec>,
    store: Arc<dyn TargetStore>,
    partitioning: EndpointPartitioning,
    max_retries: u32,
}

/// The store key and rate a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget<'a> {
    pub key: String,
    pub rate: &'a RateSpec,
}

impl DistTargetRateLimiters {
    /// Create a new builder around `store`.
    #[must_use]
    pub fn builder(store: impl TargetStore + 'static) -> DistBuilder {
        DistBuilder::new(Arc::new(store))
    }

    /// Throttle every host at `n_requests` per `per`, each host on its own cadence.
    pub fn from_uniform_rate(
        store: impl TargetStore + 'static,
        n_requests: u32,
        per: Duration,
    ) -> Result<Self, ThrottleError> {
        Ok(Self::builder(store)
            .default_rate(RateSpec::constant(n_requests, per)?)
            .build())
    }

    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    /// Resolve the target governing a request, or `None` if nothing applies.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::InvalidUrl`] if `url` has no host.
    pub fn resolve(
        &self,
        url: &str,
        endpoint_id: Option<&str>,
    ) -> Result<Option<ResolvedTarget<'_>>, ThrottleError> {
        let parsed =
            Url::parse(url).map_err(|e| ThrottleError::InvalidUrl(format!("{url}: {e}")))?;
        let request_host = parsed
            .host_str()
            .ok_or_else(|| ThrottleError::InvalidUrl(format!("{url}: missing host")))?
            .to_ascii_lowercase();

        let matched = self
            .host_rates_for(&request_host)
            .and_then(|rates| rates.resolve(url).map(|(rule, rate)| (rates.host(), rule, rate)));

        let (mut key, rate) = match matched {
            Some((host, rule, rate)) => {
                let mut key = String::from(host);
                match rule {
                    HostRule::Url(substring) => {
                        push_key_part(&mut key, "url");
                        push_key_part(&mut key, substring);
                    }
                    HostRule::Pattern(pattern) => {
                        push_key_part(&mut key, "pattern");
                        push_key_part(&mut key, pattern);
                    }
                    HostRule::Default => push_key_part(&mut key, "default"),
                }
                (key, rate)
            }
            None => match self.default_rate {
                Some(ref rate) => (format!("{request_host}|global"), rate),
                None => return Ok(None),
            },
        };

        if let (EndpointPartitioning::PerEndpoint, Some(endpoint_id)) =
            (self.partitioning, endpoint_id)
        {
            push_key_part(&mut key, endpoint_id);
        }

        Ok(Some(ResolvedTarget { key, rate }))
    }

    /// Wait until the request's target allows it and return how long the
    /// caller waited.
    ///
    /// # Errors
    ///
    /// Returns a retryable error if the store is unreachable or the update
    /// kept losing races, and [`ThrottleError::InvalidUrl`] for URLs without
    /// a host. The request is never let through unthrottled on error.
    pub async fn maybe_sleep(
        &self,
        url: &str,
        endpoint_id: Option<&str>,
    ) -> Result<Duration, ThrottleError> {
        let Some(target) = self.resolve(url, endpoint_id)? else {
            return Ok(Duration::ZERO);
        };

        let wait = self
            .update(&target.key, target.rate, |cursor, now| {
                let interval = duration_nanos(target.rate.interval());
                Duration::from_nanos(cursor.reserve(now, interval))
            })
            .await?;

        if !wait.is_zero() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                key = %target.key,
                wait_ms = wait.as_millis() as u64,
                "delaying request"
            );
            sleep(wait).await;
        }
        Ok(wait)
    }

    /// Hold back the next request to `url`'s target, in every process, for `duration`.
    pub async fn pause(&self, url: &str, duration: Duration) -> Result<(), ThrottleError> {
        self.pause_endpoint(url, None, duration).await
    }

    /// Like [`pause`](Self::pause) for the target a request with
    /// `endpoint_id` resolves to.
    pub async fn pause_endpoint(
        &self,
        url: &str,
        endpoint_id: Option<&str>,
        duration: Duration,
    ) -> Result<(), ThrottleError> {
        let Some(target) = self.resolve(url, endpoint_id)? else {
            return Ok(());
        };

        self.update(&target.key, target.rate, |cursor, now| cursor.pause(now, duration))
            .await
    }

    fn host_rates_for(&self, host: &str) -> Option<&HostRates> {
        let mut candidate = host;
        loop {
            if let Some(rates) = self.hosts.get(candidate) {
                return Some(rates);
            }
            candidate = candidate.split_once('.')?.1;
        }
    }

    async fn update<T>(
        &self,
        key: &str,
        rate: &RateSpec,
        mut apply: impl FnMut(&mut Cursor, u64) -> T + Send,
    ) -> Result<T, ThrottleError> {
        for _attempt in 1..=self.max_retries {
            let snapshot = self.store.load(key).await?;
            let mut cursor = snapshot.cursor;
            let outcome = apply(&mut cursor, snapshot.now_nanos);
            let slack = rate.longest_interval() + RETENTION_SLACK;
            let ttl = cursor.retention(snapshot.now_nanos, slack);

            if self
                .store
                .compare_and_swap(key, snapshot.version, &cursor, ttl)
                .await?
            {
                return Ok(outcome);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(key, attempt = _attempt, "lost update race, retrying");
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(key, attempts = self.max_retries, "giving up after conflicting updates");

        Err(ThrottleError::RetriesExhausted {
            key: key.to_string(),
            attempts: self.max_retries,
        })
    }
}

/// Append `|part` to a store key, escaping `\` and `|` so that distinct
/// rules and endpoint ids never share a key.
fn push_key_part(key: &mut String, part: &str) {
    key.push('|');
    for c in part.chars() {
        if matches!(c, '|' | '\\') {
            key.push('\\');
        }
        key.push(c);
    }
}

/// Builder for configuring [`DistTargetRateLimiters`].
#[derive(Debug)]
pub struct DistBuilder {
    store: Arc<dyn TargetStore>,
    hosts: HashMap<String, HostRates>,
    default_rate: Option<RateSpec>,
    partitioning: EndpointPartitioning,
    max_retries: u32,
}

impl DistBuilder {
    fn new(store: Arc<dyn TargetStore>) -> Self {
        Self {
            store,
            hosts: HashMap::new(),
            default_rate: None,
            partitioning: EndpointPartitioning::Shared,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Add the rates for one host. A later bundle for the same host replaces
    /// the earlier one.
    #[must_use]
    pub fn host_rates(mut self, rates: HostRates) -> Self {
        let host = rates.host().to_string();
        if self.hosts.insert(host, rates).is_some() {
            #[cfg(feature = "tracing")]
            tracing::warn!("replacing earlier host rates for the same host");
        }
        self
    }

    /// Set the rate for hosts, or URLs, that no [`HostRates`] covers.
    #[must_use]
    pub fn default_rate(mut self, rate: RateSpec) -> Self {
        self.default_rate = Some(rate);
        self
    }

    /// Choose whether targets are split further by endpoint id.
    #[must_use]
    pub fn partitioning(mut self, partitioning: EndpointPartitioning) -> Self {
        self.partitioning = partitioning;
        self
    }

    /// Set how many optimistic update attempts an operation makes before
    /// failing with [`ThrottleError::RetriesExhausted`]. At least one attempt
    /// is always made.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    #[must_use]
    pub fn build(self) -> DistTargetRateLimiters {
        DistTargetRateLimiters {
            hosts: Arc::new(self.hosts),
            default_rate: self.default_rate,
            store: self.store,
            partitioning: self.partitioning,
            max_retries: self.max_retries,
        }
    }
}
