use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use common::{Error, Result, Strategy};

use crate::source::{timeframe_duration, IndicatorSource};
use crate::trailing::validate_common;
use crate::{Algorithm, BuySignal, TradingContext};

const DEFAULT_FAST: u32 = 12;
const DEFAULT_SLOW: u32 = 26;
const DEFAULT_SIGNAL: u32 = 9;
const DEFAULT_TIMEFRAME: &str = "1h";

/// Buys on a bullish MACD crossover of the last closed candle.
pub struct MacdCross {
    indicators: Arc<dyn IndicatorSource>,
}

impl MacdCross {
    pub const NAME: &'static str = "macd_cross";

    pub fn new(indicators: Arc<dyn IndicatorSource>) -> Self {
        Self { indicators }
    }

    fn periods(strategy: &Strategy) -> (u32, u32, u32) {
        (
            strategy.macd_fast_period.unwrap_or(DEFAULT_FAST),
            strategy.macd_slow_period.unwrap_or(DEFAULT_SLOW),
            strategy.macd_signal_period.unwrap_or(DEFAULT_SIGNAL),
        )
    }

    fn timeframe(strategy: &Strategy) -> &str {
        strategy.macd_timeframe.as_deref().unwrap_or(DEFAULT_TIMEFRAME)
    }
}

#[async_trait]
impl Algorithm for MacdCross {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn validate_config(&self, strategy: &Strategy) -> Result<()> {
        validate_common(strategy)?;

        let (fast, slow, signal) = Self::periods(strategy);
        if fast == 0 || signal == 0 || fast >= slow {
            return Err(Error::Config(format!(
                "strategy {}: MACD periods must satisfy 0 < fast < slow and signal > 0, got {fast}/{slow}/{signal}",
                strategy.id
            )));
        }
        let timeframe = Self::timeframe(strategy);
        if timeframe_duration(timeframe).is_none() {
            return Err(Error::Config(format!(
                "strategy {}: unsupported macd_timeframe '{timeframe}'",
                strategy.id
            )));
        }
        Ok(())
    }

    async fn should_buy(&self, ctx: &TradingContext, strategy: &Strategy) -> Result<BuySignal> {
        let (fast, slow, signal) = Self::periods(strategy);
        let timeframe = Self::timeframe(strategy);

        let reading = self
            .indicators
            .macd(&ctx.pair, timeframe, fast, slow, signal)
            .await?;
        debug!(
            strategy_id = strategy.id,
            histogram = reading.histogram,
            prev_histogram = reading.prev_histogram,
            "MACD reading"
        );

        if !reading.crossed_up() {
            return Ok(BuySignal::hold(format!(
                "no bullish crossover (histogram {:.6} -> {:.6})",
                reading.prev_histogram, reading.histogram
            )));
        }

        let limit_price = ctx.precision.round_price(ctx.price);
        let amount = ctx.precision.amount_for_quote(strategy.quote_amount, limit_price);
        let target_price = ctx
            .precision
            .round_price(limit_price * (1.0 + strategy.profit_target / 100.0));

        Ok(BuySignal {
            should_buy: amount > 0.0 && limit_price > 0.0,
            amount,
            limit_price,
            target_price,
            reason: format!(
                "MACD crossed above signal on {timeframe} ({fast}/{slow}/{signal})"
            ),
        })
    }
}
