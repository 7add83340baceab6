use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;

use common::{Candle, Error, ExchangeGateway, Result};

use crate::indicators::{volatility_pct, MacdIndicator, RsiIndicator};

pub type MacdReading = crate::indicators::MacdValues;

/// Technical indicators for a pair and timeframe, computed over closed candles.
#[async_trait]
pub trait IndicatorSource: Send + Sync {
    async fn rsi(&self, pair: &str, timeframe: &str, period: u32) -> Result<f64>;

    async fn macd(
        &self,
        pair: &str,
        timeframe: &str,
        fast: u32,
        slow: u32,
        signal: u32,
    ) -> Result<MacdReading>;

    /// Standard deviation of per-candle returns, in percent.
    async fn volatility(&self, pair: &str, timeframe: &str, period: u32) -> Result<f64>;
}

/// Length of one candle for exchange timeframe notation (`1m`, `4h`, `1d`, `1w`).
pub fn timeframe_duration(timeframe: &str) -> Option<Duration> {
    let split = timeframe.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = timeframe.split_at(split);
    let count: i64 = count.parse().ok().filter(|n| *n > 0)?;
    match unit {
        "m" => Some(Duration::minutes(count)),
        "h" => Some(Duration::hours(count)),
        "d" => Some(Duration::days(count)),
        "w" => Some(Duration::weeks(count)),
        _ => None,
    }
}

/// Computes indicators from candles fetched through the exchange gateway.
pub struct CandleIndicators {
    gateway: Arc<dyn ExchangeGateway>,
}

impl CandleIndicators {
    /// Upper bound on candles fetched per request (Binance's kline limit).
    const MAX_CANDLES: usize = 1000;

    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Closes of fully closed candles, oldest first.
    async fn closes(&self, pair: &str, timeframe: &str, wanted: usize) -> Result<Vec<f64>> {
        let step = timeframe_duration(timeframe)
            .ok_or_else(|| Error::Config(format!("unsupported timeframe '{timeframe}'")))?;
        // One extra for the candle that is still forming.
        let limit = (wanted + 1).min(Self::MAX_CANDLES);
        let candles = self.gateway.fetch_candles(pair, timeframe, None, limit).await?;
        let closes = closed_closes(&candles, step);
        debug!(pair, timeframe, candles = closes.len(), "Fetched closed candles");
        Ok(closes)
    }
}

fn closed_closes(candles: &[Candle], step: Duration) -> Vec<f64> {
    let now = Utc::now();
    candles
        .iter()
        .filter(|c| c.open_time + step <= now)
        .map(|c| c.close)
        .collect()
}

fn insufficient(what: &str, pair: &str, timeframe: &str, have: usize) -> Error {
    Error::Other(format!(
        "not enough {timeframe} candles for {what} on {pair} (have {have})"
    ))
}

#[async_trait]
impl IndicatorSource for CandleIndicators {
    async fn rsi(&self, pair: &str, timeframe: &str, period: u32) -> Result<f64> {
        let indicator = RsiIndicator::new(period as usize)
            .ok_or_else(|| Error::Config(format!("invalid RSI period {period}")))?;
        // Extra history lets Wilder smoothing settle.
        let closes = self.closes(pair, timeframe, period as usize * 10).await?;
        indicator
            .compute(&closes)
            .ok_or_else(|| insufficient("RSI", pair, timeframe, closes.len()))
    }

    async fn macd(
        &self,
        pair: &str,
        timeframe: &str,
        fast: u32,
        slow: u32,
        signal: u32,
    ) -> Result<MacdReading> {
        let indicator = MacdIndicator::new(fast as usize, slow as usize, signal as usize)
            .ok_or_else(|| {
                Error::Config(format!("invalid MACD periods {fast}/{slow}/{signal}"))
            })?;
        let closes = self.closes(pair, timeframe, indicator.min_len() * 3).await?;
        indicator
            .compute(&closes)
            .ok_or_else(|| insufficient("MACD", pair, timeframe, closes.len()))
    }

    async fn volatility(&self, pair: &str, timeframe: &str, period: u32) -> Result<f64> {
        let closes = self.closes(pair, timeframe, period as usize + 1).await?;
        volatility_pct(&closes, period as usize)
            .ok_or_else(|| insufficient("volatility", pair, timeframe, closes.len()))
    }
}
