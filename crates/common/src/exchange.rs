use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Balance, Candle, ExchangeOrder, MarketPrecision, Result};

/// Abstraction over the exchange account.
///
/// `BinanceClient` implements this for live trading and `PaperExchange` for
/// simulation. Both are wrapped in `RetryingGateway` before the engine sees
/// them. Every call may block on network I/O or fail transiently.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest traded price for a pair.
    async fn get_price(&self, pair: &str) -> Result<f64>;

    /// Free and locked balance of one asset.
    async fn fetch_balance(&self, asset: &str) -> Result<Balance>;

    /// Place a GTC limit buy. Returns the exchange's order id.
    async fn place_limit_buy_order(&self, pair: &str, amount: f64, price: f64) -> Result<String>;

    /// Place a GTC limit sell. Returns the exchange's order id.
    async fn place_limit_sell_order(&self, pair: &str, amount: f64, price: f64)
        -> Result<String>;

    async fn fetch_order(&self, id: &str, pair: &str) -> Result<ExchangeOrder>;

    async fn cancel_order(&self, id: &str, pair: &str) -> Result<()>;

    /// Candles oldest-first. `timeframe` uses exchange notation (`1m`, `1h`, `1d`).
    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Tick/lot precision and minimum notional for a pair.
    async fn market_precision(&self, pair: &str) -> Result<MarketPrecision>;
}
