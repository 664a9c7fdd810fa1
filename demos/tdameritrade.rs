//! TD Ameritrade API throttling configuration.
//!
//! This example spaces requests to the market data endpoints, with tighter
//! per-symbol limits on option chains, and pauses everything after a 429.
//!
//! Run with: cargo run --example tdameritrade

use host_throttle::{
    EndpointId, EndpointPartitioning, RatesController, ThrottleError, ThrottleMiddleware,
};
use reqwest_middleware::ClientBuilder;
use std::sync::Arc;
use std::time::Duration;

const API: &str = "https://api.tdameritrade.com";

/// Helper to create Duration from seconds
const fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Helper to create Duration from minutes
const fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Build the TD Ameritrade rates controller.
pub fn tdameritrade_controller() -> Result<RatesController, ThrottleError> {
    RatesController::builder()
        // Account wide ceiling on market data
        .rule(|r| r.substring("/v1/marketdata").limit(120, mins(1)))
        // Quotes and price history
        .rule(|r| r.regex(r"/v1/marketdata/[A-Z.]+/(quotes|pricehistory)").limit(60, mins(1)))
        // Option chains are expensive, keep each symbol at a gentle random pace
        .rule(|r| {
            r.substring("/v1/marketdata/chains")
                .endpoint_id("SPY")
                .variable_limit(1, 3, secs(1))
        })
        .rule(|r| {
            r.substring("/v1/marketdata/chains")
                .endpoint_id("TSLA")
                .limit(1, secs(2))
        })
        // Everything else: one limiter per symbol
        .default_limit(2, secs(1))
        .partitioning(EndpointPartitioning::PerEndpoint)
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("TD Ameritrade Throttling Example\n");

    let controller = Arc::new(tdameritrade_controller()?);

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ThrottleMiddleware::from_arc(controller.clone()))
        .build();

    for symbol in ["SPY", "TSLA", "SPY", "TSLA"] {
        print!("Fetching {symbol} option chain... ");
        let response = client
            .get(format!("{API}/v1/marketdata/chains"))
            .query(&[("symbol", symbol)])
            .with_extension(EndpointId::from(symbol))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                println!("rate limited by the server, backing off");
                controller.pause(&format!("{API}/v1/marketdata/chains"), Some(symbol), secs(30));
            }
            Ok(resp) => println!("{}", resp.status()),
            Err(e) => println!("request failed: {e}"),
        }
    }

    // Symbols without a rule of their own get their own default limiter.
    println!("\nPer-symbol default limiters: {}", controller.partition_count());
    controller.cleanup();

    Ok(())
}
