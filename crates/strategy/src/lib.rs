pub mod config;
pub mod indicators;
pub mod macd_cross;
pub mod registry;
pub mod rsi_dca;
pub mod source;
pub mod trailing;

pub use config::{StrategyFileConfig, StrategySeed};
pub use macd_cross::MacdCross;
pub use registry::AlgorithmRegistry;
pub use rsi_dca::RsiDca;
pub use source::{CandleIndicators, IndicatorSource, MacdReading};

use async_trait::async_trait;

use common::{Cycle, MarketPrecision, Result, Strategy};

/// Market snapshot handed to an algorithm for one decision.
#[derive(Debug, Clone)]
pub struct TradingContext {
    pub pair: String,
    pub price: f64,
    /// Free quote-currency balance on the exchange.
    pub quote_balance: f64,
    pub open_cycles: Vec<Cycle>,
    pub precision: MarketPrecision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuySignal {
    pub should_buy: bool,
    /// Base-asset amount, rounded up to lot precision.
    pub amount: f64,
    pub limit_price: f64,
    /// Pre-computed exit target stored on the cycle.
    pub target_price: f64,
    pub reason: String,
}

impl BuySignal {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            should_buy: false,
            amount: 0.0,
            limit_price: 0.0,
            target_price: 0.0,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SellSignal {
    pub should_sell: bool,
    pub limit_price: f64,
    pub reason: String,
}

impl SellSignal {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            should_sell: false,
            limit_price: 0.0,
            reason: reason.into(),
        }
    }

    pub fn sell(limit_price: f64, reason: impl Into<String>) -> Self {
        Self {
            should_sell: true,
            limit_price,
            reason: reason.into(),
        }
    }
}

/// A stateless buy/sell decision function for one strategy type.
///
/// Implementations are resolved by name through [`AlgorithmRegistry`].
#[async_trait]
pub trait Algorithm: Send + Sync {
    /// Registry name, as stored in `Strategy::algorithm`.
    fn name(&self) -> &'static str;

    /// Reject a strategy whose parameters this algorithm cannot run with.
    fn validate_config(&self, strategy: &Strategy) -> Result<()>;

    async fn should_buy(&self, ctx: &TradingContext, strategy: &Strategy) -> Result<BuySignal>;

    /// Defaults to the trailing-stop-after-target rule.
    async fn should_sell(
        &self,
        ctx: &TradingContext,
        cycle: &Cycle,
        strategy: &Strategy,
    ) -> Result<SellSignal> {
        Ok(trailing::trailing_stop_signal(ctx, cycle, strategy))
    }
}
