use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::warn;

use common::{Balance, Candle, ExchangeGateway, ExchangeOrder, MarketPrecision, Result};

/// Bounded retry with exponential backoff for gateway calls.
///
/// Delay before retry `n` (0-based) is `base_delay × 2^n` plus up to
/// `jitter_factor` of that on top.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self { base_delay, ..Self::default() }
    }

    /// Delay to wait after the `retry`-th failure (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        let jitter_range = exp.as_secs_f64() * self.jitter_factor.max(0.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(0.0..=jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64(exp.as_secs_f64() + jitter)
    }
}

/// Gateway decorator that retries transient failures.
///
/// Only errors for which [`common::Error::is_transient`] holds are retried;
/// everything else is returned on the first failure.
pub struct RetryingGateway {
    inner: Arc<dyn ExchangeGateway>,
    policy: RetryPolicy,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn ExchangeGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt - 1);
                    warn!(
                        op,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient exchange error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for RetryingGateway {
    async fn get_price(&self, pair: &str) -> Result<f64> {
        self.call("get_price", || self.inner.get_price(pair)).await
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Balance> {
        self.call("fetch_balance", || self.inner.fetch_balance(asset)).await
    }

    async fn place_limit_buy_order(&self, pair: &str, amount: f64, price: f64) -> Result<String> {
        self.call("place_limit_buy_order", || {
            self.inner.place_limit_buy_order(pair, amount, price)
        })
        .await
    }

    async fn place_limit_sell_order(&self, pair: &str, amount: f64, price: f64) -> Result<String> {
        self.call("place_limit_sell_order", || {
            self.inner.place_limit_sell_order(pair, amount, price)
        })
        .await
    }

    async fn fetch_order(&self, id: &str, pair: &str) -> Result<ExchangeOrder> {
        self.call("fetch_order", || self.inner.fetch_order(id, pair)).await
    }

    async fn cancel_order(&self, id: &str, pair: &str) -> Result<()> {
        self.call("cancel_order", || self.inner.cancel_order(id, pair)).await
    }

    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.call("fetch_candles", || {
            self.inner.fetch_candles(pair, timeframe, since, limit)
        })
        .await
    }

    async fn market_precision(&self, pair: &str) -> Result<MarketPrecision> {
        self.call("market_precision", || self.inner.market_precision(pair)).await
    }
}
