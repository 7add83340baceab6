use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use common::{Error, Result, Strategy};

use crate::source::{timeframe_duration, IndicatorSource};
use crate::trailing::validate_common;
use crate::{Algorithm, BuySignal, TradingContext};

/// Lower bound on the computed profit target (0.1%).
pub const MIN_PROFIT_PCT: f64 = 0.001;
/// Entry offset below market when RSI sits right at the threshold (0.5%).
pub const MAX_ENTRY_OFFSET_PCT: f64 = 0.005;
/// Profit targets under this put the entry into scalping mode (1%).
pub const SCALPING_PROFIT_PCT: f64 = 0.01;
/// Floor on the scalping compression factor.
const MIN_SCALPING_FACTOR: f64 = 0.25;

/// RSI-gated dollar-cost averaging.
///
/// Buys only while RSI is at or below the threshold, with a limit placed a
/// little under market and a volatility-adjusted profit target.
pub struct RsiDca {
    indicators: Arc<dyn IndicatorSource>,
}

impl RsiDca {
    pub const NAME: &'static str = "rsi_dca";

    pub fn new(indicators: Arc<dyn IndicatorSource>) -> Self {
        Self { indicators }
    }
}

/// Profit target as a fraction.
///
/// `base/100 + ((volatility − base)/100) × (adjustment/100)`, floored at 0.1%.
/// Without a volatility reading the base target is used as-is.
pub fn profit_target_pct(base: f64, volatility: Option<f64>, adjustment: f64) -> f64 {
    let pct = match volatility {
        Some(vol) => base / 100.0 + ((vol - base) / 100.0) * (adjustment / 100.0),
        None => base / 100.0,
    };
    pct.max(MIN_PROFIT_PCT)
}

/// Fraction below market to place the buy limit.
///
/// Scales with RSI relative to the threshold, so a deeply oversold market is
/// bought closer to the current price. Targets under 1% compress the offset
/// further so scalping entries fill.
pub fn entry_offset_pct(rsi: f64, threshold: f64, profit_pct: f64) -> f64 {
    let scale = if threshold > 0.0 {
        (rsi / threshold).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut offset = MAX_ENTRY_OFFSET_PCT * scale;
    if profit_pct < SCALPING_PROFIT_PCT {
        offset *= (profit_pct * 100.0).max(MIN_SCALPING_FACTOR);
    }
    offset
}

fn require<T: Clone>(value: &Option<T>, strategy: &Strategy, field: &str) -> Result<T> {
    value.clone().ok_or_else(|| {
        Error::Config(format!(
            "strategy {} ({}): {field} is required for {}",
            strategy.id,
            strategy.name,
            RsiDca::NAME
        ))
    })
}

#[async_trait]
impl Algorithm for RsiDca {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn validate_config(&self, strategy: &Strategy) -> Result<()> {
        validate_common(strategy)?;

        let threshold = require(&strategy.rsi_threshold, strategy, "rsi_threshold")?;
        if !(0.0..=100.0).contains(&threshold) || threshold == 0.0 {
            return Err(Error::Config(format!(
                "strategy {}: rsi_threshold must be in (0, 100], got {threshold}",
                strategy.id
            )));
        }
        let period = require(&strategy.rsi_period, strategy, "rsi_period")?;
        if period < 2 {
            return Err(Error::Config(format!(
                "strategy {}: rsi_period must be at least 2",
                strategy.id
            )));
        }
        let timeframe = require(&strategy.rsi_timeframe, strategy, "rsi_timeframe")?;
        if timeframe_duration(&timeframe).is_none() {
            return Err(Error::Config(format!(
                "strategy {}: unsupported rsi_timeframe '{timeframe}'",
                strategy.id
            )));
        }
        if let Some(tf) = &strategy.volatility_timeframe {
            if timeframe_duration(tf).is_none() {
                return Err(Error::Config(format!(
                    "strategy {}: unsupported volatility_timeframe '{tf}'",
                    strategy.id
                )));
            }
        }
        if matches!(strategy.volatility_period, Some(p) if p < 2) {
            return Err(Error::Config(format!(
                "strategy {}: volatility_period must be at least 2",
                strategy.id
            )));
        }
        Ok(())
    }

    async fn should_buy(&self, ctx: &TradingContext, strategy: &Strategy) -> Result<BuySignal> {
        let threshold = require(&strategy.rsi_threshold, strategy, "rsi_threshold")?;
        let period = require(&strategy.rsi_period, strategy, "rsi_period")?;
        let timeframe = require(&strategy.rsi_timeframe, strategy, "rsi_timeframe")?;

        let rsi = self.indicators.rsi(&ctx.pair, &timeframe, period).await?;
        if rsi > threshold {
            return Ok(BuySignal::hold(format!(
                "RSI {rsi:.2} above threshold {threshold:.2}"
            )));
        }

        let volatility = match strategy.volatility_adjustment {
            Some(adjustment) if adjustment != 0.0 => {
                let vol_timeframe = strategy.volatility_timeframe.as_deref().unwrap_or(&timeframe);
                let vol_period = strategy.volatility_period.unwrap_or(period);
                Some(
                    self.indicators
                        .volatility(&ctx.pair, vol_timeframe, vol_period)
                        .await?,
                )
            }
            _ => None,
        };
        let profit_pct = profit_target_pct(
            strategy.profit_target,
            volatility,
            strategy.volatility_adjustment.unwrap_or(0.0),
        );
        let offset = entry_offset_pct(rsi, threshold, profit_pct);

        let limit_price = ctx.precision.round_price(ctx.price * (1.0 - offset));
        let amount = ctx.precision.amount_for_quote(strategy.quote_amount, limit_price);
        let target_price = ctx.precision.round_price(limit_price * (1.0 + profit_pct));

        debug!(
            strategy_id = strategy.id,
            rsi,
            volatility = ?volatility,
            profit_pct,
            offset,
            "RSI-DCA buy computed"
        );

        Ok(BuySignal {
            should_buy: amount > 0.0 && limit_price > 0.0,
            amount,
            limit_price,
            target_price,
            reason: format!(
                "RSI {rsi:.2} <= {threshold:.2}, entry {:.3}% below market, target +{:.3}%",
                offset * 100.0,
                profit_pct * 100.0
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trailing::tests::{ctx, strategy};
    use crate::MacdReading;

    struct FixedIndicators {
        rsi: f64,
        volatility: f64,
    }

    #[async_trait]
    impl IndicatorSource for FixedIndicators {
        async fn rsi(&self, _: &str, _: &str, _: u32) -> Result<f64> {
            Ok(self.rsi)
        }
        async fn macd(&self, _: &str, _: &str, _: u32, _: u32, _: u32) -> Result<MacdReading> {
            Err(Error::Other("not used".into()))
        }
        async fn volatility(&self, _: &str, _: &str, _: u32) -> Result<f64> {
            Ok(self.volatility)
        }
    }

    fn algo(rsi: f64, volatility: f64) -> RsiDca {
        RsiDca::new(Arc::new(FixedIndicators { rsi, volatility }))
    }

    #[test]
    fn missing_threshold_fails_validation() {
        let mut s = strategy();
        s.rsi_threshold = None;
        let err = algo(30.0, 1.0).validate_config(&s).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn valid_config_passes() {
        assert!(algo(30.0, 1.0).validate_config(&strategy()).is_ok());
    }

    #[test]
    fn bad_timeframe_fails_validation() {
        let mut s = strategy();
        s.rsi_timeframe = Some("hourly".into());
        assert!(algo(30.0, 1.0).validate_config(&s).is_err());
    }

    #[test]
    fn profit_target_formula() {
        // 2% base, 4% volatility, 50% adjustment => 2% + 2% × 0.5 = 3%
        let pct = profit_target_pct(2.0, Some(4.0), 50.0);
        assert!((pct - 0.03).abs() < 1e-12, "got {pct}");
    }

    #[test]
    fn profit_target_is_clamped() {
        // 0.5% base, zero volatility, 100% adjustment => 0% => clamped to 0.1%
        assert_eq!(profit_target_pct(0.5, Some(0.0), 100.0), MIN_PROFIT_PCT);
    }

    #[test]
    fn lower_rsi_buys_closer_to_market() {
        let near = entry_offset_pct(10.0, 40.0, 0.02);
        let far = entry_offset_pct(40.0, 40.0, 0.02);
        assert!(near < far);
        assert!((far - MAX_ENTRY_OFFSET_PCT).abs() < 1e-12);
    }

    #[test]
    fn scalping_mode_compresses_offset() {
        let normal = entry_offset_pct(30.0, 30.0, 0.02);
        let scalping = entry_offset_pct(30.0, 30.0, 0.005);
        assert!((scalping - normal * 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn refuses_to_buy_above_threshold() {
        let signal = algo(50.0, 1.0).should_buy(&ctx(100.0), &strategy()).await.unwrap();
        assert!(!signal.should_buy);
        assert!(signal.reason.contains("above threshold"));
    }

    #[tokio::test]
    async fn buys_below_market_with_target() {
        let s = strategy(); // threshold 35, profit 2%
        let signal = algo(17.5, 1.0).should_buy(&ctx(100.0), &s).await.unwrap();
        assert!(signal.should_buy);
        // offset = 0.5% × 0.5 = 0.25% => 99.75
        assert_eq!(signal.limit_price, 99.75);
        assert!(signal.amount * signal.limit_price >= s.quote_amount);
        assert!((signal.target_price - 99.75 * 1.02).abs() <= 0.005);
    }

    #[tokio::test]
    async fn volatility_raises_target() {
        let mut s = strategy();
        s.volatility_adjustment = Some(50.0);
        let calm = algo(17.5, 2.0).should_buy(&ctx(100.0), &s).await.unwrap();
        let wild = algo(17.5, 6.0).should_buy(&ctx(100.0), &s).await.unwrap();
        assert!(wild.target_price > calm.target_price);
    }
}
