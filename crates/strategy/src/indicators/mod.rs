pub mod macd;
pub mod rsi;
pub mod volatility;

pub use macd::{MacdIndicator, MacdValues};
pub use rsi::RsiIndicator;
pub use volatility::volatility_pct;
