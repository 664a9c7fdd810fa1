//! reqwest middleware that throttles requests before they are sent.

use async_trait::async_trait;
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use std::sync::Arc;
use std::time::Duration;

use crate::controller::RatesController;
use crate::distributed::DistTargetRateLimiters;
use crate::error::ThrottleError;

/// Anything that can delay a request until its rate limits allow it.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait until the request may be sent and return how long that took.
    async fn maybe_sleep(
        &self,
        url: &str,
        endpoint_id: Option<&str>,
    ) -> Result<Duration, ThrottleError>;
}

#[async_trait]
impl Throttle for RatesController {
    async fn maybe_sleep(
        &self,
        url: &str,
        endpoint_id: Option<&str>,
    ) -> Result<Duration, ThrottleError> {
        Ok(RatesController::maybe_sleep(self, url, endpoint_id).await)
    }
}

#[async_trait]
impl Throttle for DistTargetRateLimiters {
    async fn maybe_sleep(
        &self,
        url: &str,
        endpoint_id: Option<&str>,
    ) -> Result<Duration, ThrottleError> {
        DistTargetRateLimiters::maybe_sleep(self, url, endpoint_id).await
    }
}

/// Request extension naming the logical endpoint a request targets.
///
/// ```rust,no_run
/// use host_throttle::{EndpointId, RatesController, ThrottleMiddleware};
/// use reqwest_middleware::ClientBuilder;
/// use std::time::Duration;
///
/// # async fn example() {
/// let controller = RatesController::builder()
///     .rule(|r| {
///         r.substring("/v1/marketdata/chains")
///             .endpoint_id("TSLA")
///             .limit(2, Duration::from_secs(1))
///     })
///     .build()
///     .unwrap();
///
/// let client = ClientBuilder::new(reqwest::Client::new())
///     .with(ThrottleMiddleware::new(controller))
///     .build();
///
/// client
///     .get("https://api.tdameritrade.com/v1/marketdata/chains?symbol=TSLA")
///     .with_extension(EndpointId::from("TSLA"))
///     .send()
///     .await
///     .unwrap();
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(pub String);

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The throttling middleware.
///
/// Delays every request until the wrapped [`Throttle`] admits it. The
/// endpoint id is read from an [`EndpointId`] request extension. Throttle
/// errors, such as an unreachable shared store, fail the request instead of
/// letting it through.
///
/// Clones share the same throttle state.
#[derive(Debug)]
pub struct ThrottleMiddleware<T> {
    throttle: Arc<T>,
}

impl<T> Clone for ThrottleMiddleware<T> {
    fn clone(&self) -> Self {
        Self {
            throttle: self.throttle.clone(),
        }
    }
}

impl<T: Throttle> ThrottleMiddleware<T> {
    #[must_use]
    pub fn new(throttle: T) -> Self {
        Self::from_arc(Arc::new(throttle))
    }

    /// Wrap a throttle that is also used outside the middleware.
    #[must_use]
    pub fn from_arc(throttle: Arc<T>) -> Self {
        Self { throttle }
    }

    pub fn throttle(&self) -> &Arc<T> {
        &self.throttle
    }
}

#[async_trait]
impl<T: Throttle + 'static> Middleware for ThrottleMiddleware<T> {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let endpoint_id = extensions.get::<EndpointId>().map(|id| id.0.clone());

        self.throttle
            .maybe_sleep(req.url().as_str(), endpoint_id.as_deref())
            .await?;

        next.run(req, extensions).await
    }
}
