//! Client-side request throttling.
//!
//! This crate decides, before a request is sent, how long the caller must
//! wait so that configured rate ceilings are respected. Requests are only
//! ever delayed, never rejected.
//!
//! # Features
//!
//! - **Single-key limiter**: [`RateLimiter`] spaces concurrent callers evenly,
//!   reserving each caller's slot before it sleeps
//! - **Constant and variable rates**: [`RateSpec`] covers fixed spacing and a
//!   freshly drawn random spacing per caller
//! - **Rule matching**: [`RatesController`] applies every rule whose URL
//!   substring or regular expression matches, optionally per endpoint id
//! - **Distributed limits**: [`DistTargetRateLimiters`] keeps state in a shared
//!   [`TargetStore`] (Redis with the `redis` feature) so many processes honor
//!   one cadence per target
//! - **reqwest integration**: [`ThrottleMiddleware`] throttles every request
//!   sent through a [`reqwest_middleware`] client
//!
//! # Rule Matching Behavior
//!
//! All matching rules apply. Each matching limiter reserves its own slot and
//! the caller waits once, for the longest of those waits:
//!
//! ```rust
//! use host_throttle::RatesController;
//! use std::time::Duration;
//!
//! let controller = RatesController::builder()
//!     // 10 requests per second to the chains endpoint...
//!     .rule(|r| r.substring("/v1/marketdata/chains").limit(10, Duration::from_secs(1)))
//!     // ...and at most 5 per second of those for TSLA.
//!     .rule(|r| {
//!         r.substring("/v1/marketdata/chains")
//!             .endpoint_id("TSLA")
//!             .limit(5, Duration::from_secs(1))
//!     })
//!     .build()
//!     .unwrap();
//! ```
//!
//! A rule with an endpoint id only matches requests carrying that id. A
//! default rate covers requests no rule matched; with
//! [`EndpointPartitioning::PerEndpoint`] every endpoint id gets its own
//! default limiter.
//!
//! # Example
//!
//! ```rust,no_run
//! use host_throttle::{
//!     DistTargetRateLimiters, HostRates, MemoryStore, RateSpec, ThrottleMiddleware,
//! };
//! use reqwest_middleware::ClientBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiters = DistTargetRateLimiters::builder(MemoryStore::new())
//!     .host_rates(
//!         HostRates::new("test.com")
//!             .url_rate("test.com/api", RateSpec::constant(5, Duration::from_secs(1))?)
//!             .default_rate(RateSpec::variable(2, 10, Duration::from_secs(1))?),
//!     )
//!     .default_rate(RateSpec::constant(20, Duration::from_secs(1))?)
//!     .build();
//!
//! let client = ClientBuilder::new(reqwest::Client::new())
//!     .with(ThrottleMiddleware::new(limiters))
//!     .build();
//!
//! client.get("https://www.test.com/api/items").send().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod controller;
mod cursor;
mod distributed;
mod endpoint;
mod error;
mod host_rates;
mod limiter;
mod middleware;
mod rates;
mod store;

// Public re-exports
pub use builder::{ControllerBuilder, RuleBuilder};
pub use controller::{EndpointPartitioning, RatesController};
pub use cursor::Cursor;
pub use distributed::{DEFAULT_MAX_RETRIES, DistBuilder, DistTargetRateLimiters, ResolvedTarget};
pub use endpoint::{EndpointRateLimiter, MatchPattern};
pub use error::ThrottleError;
pub use host_rates::{HostRates, HostRule};
pub use limiter::RateLimiter;
pub use middleware::{EndpointId, Throttle, ThrottleMiddleware};
pub use rates::{ConstantRate, RateSpec, VariableRate};
pub use store::{MemoryStore, StoreSnapshot, TargetStore};
#[cfg(feature = "redis")]
pub use store::{DEFAULT_PREFIX, RedisStore};
