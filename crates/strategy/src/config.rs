use serde::{Deserialize, Serialize};

use common::{Error, NewStrategy, Result};

/// Strategy seed file (TOML), inserted into the store on first start.
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// name = "BTC RSI dip buyer"
/// algorithm = "rsi_dca"
/// cron_expression = "*/5 * * * *"
/// quote_amount = 50.0
/// max_concurrent_orders = 3
/// rsi_threshold = 35.0
/// rsi_period = 14
/// rsi_timeframe = "1h"
/// profit_target = 2.0
/// trailing_stop_delta = 0.5
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategySeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategySeed {
    /// Human-readable name, unique within the file.
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `rsi_dca` or `macd_cross`.
    pub algorithm: String,
    pub cron_expression: String,
    /// Quote currency spent per buy.
    pub quote_amount: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_orders: i64,
    #[serde(default)]
    pub rsi_threshold: Option<f64>,
    #[serde(default)]
    pub rsi_period: Option<u32>,
    #[serde(default)]
    pub rsi_timeframe: Option<String>,
    #[serde(default)]
    pub macd_fast_period: Option<u32>,
    #[serde(default)]
    pub macd_slow_period: Option<u32>,
    #[serde(default)]
    pub macd_signal_period: Option<u32>,
    #[serde(default)]
    pub macd_timeframe: Option<String>,
    #[serde(default)]
    pub volatility_period: Option<u32>,
    #[serde(default)]
    pub volatility_timeframe: Option<String>,
    #[serde(default)]
    pub volatility_adjustment: Option<f64>,
    /// Percent, e.g. `2.0` for 2%.
    pub profit_target: f64,
    #[serde(default)]
    pub trailing_stop_delta: Option<f64>,
    #[serde(default)]
    pub sell_offset: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent() -> i64 {
    1
}

impl From<StrategySeed> for NewStrategy {
    fn from(seed: StrategySeed) -> Self {
        NewStrategy {
            name: seed.name,
            enabled: seed.enabled,
            algorithm: seed.algorithm,
            cron_expression: seed.cron_expression,
            quote_amount: seed.quote_amount,
            max_concurrent_orders: seed.max_concurrent_orders,
            rsi_threshold: seed.rsi_threshold,
            rsi_period: seed.rsi_period,
            rsi_timeframe: seed.rsi_timeframe,
            macd_fast_period: seed.macd_fast_period,
            macd_slow_period: seed.macd_slow_period,
            macd_signal_period: seed.macd_signal_period,
            macd_timeframe: seed.macd_timeframe,
            volatility_period: seed.volatility_period,
            volatility_timeframe: seed.volatility_timeframe,
            volatility_adjustment: seed.volatility_adjustment,
            profit_target: seed.profit_target,
            trailing_stop_delta: seed.trailing_stop_delta,
            sell_offset: seed.sell_offset,
        }
    }
}

impl StrategyFileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid strategy config: {e}")))
    }

    /// Load from a TOML file. A missing file yields an empty config.
    pub fn load(path: &str) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| Error::Config(format!("strategy config at '{path}': {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
