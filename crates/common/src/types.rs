use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an order as recorded locally. Only the order monitor moves an
/// order out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// A persisted trading strategy.
///
/// Algorithm parameters are optional because each algorithm only reads the
/// subset it needs; `Algorithm::validate_config` decides which are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    /// Registry name of the decision algorithm, e.g. `rsi_dca`.
    pub algorithm: String,
    pub cron_expression: String,
    /// Quote currency spent per buy.
    pub quote_amount: f64,
    pub max_concurrent_orders: i64,

    pub rsi_threshold: Option<f64>,
    pub rsi_period: Option<u32>,
    pub rsi_timeframe: Option<String>,

    pub macd_fast_period: Option<u32>,
    pub macd_slow_period: Option<u32>,
    pub macd_signal_period: Option<u32>,
    pub macd_timeframe: Option<String>,

    pub volatility_period: Option<u32>,
    pub volatility_timeframe: Option<String>,
    /// Weight (in percent) of the volatility term in the profit target.
    pub volatility_adjustment: Option<f64>,

    /// Profit target in percent, e.g. `2.0` = 2%.
    pub profit_target: f64,
    /// Trailing-stop retrace in percent from the cycle's high.
    pub trailing_stop_delta: Option<f64>,
    /// Sell limit placed this many percent above the trigger price.
    pub sell_offset: Option<f64>,

    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a strategy; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStrategy {
    pub name: String,
    pub enabled: bool,
    pub algorithm: String,
    pub cron_expression: String,
    pub quote_amount: f64,
    pub max_concurrent_orders: i64,
    pub rsi_threshold: Option<f64>,
    pub rsi_period: Option<u32>,
    pub rsi_timeframe: Option<String>,
    pub macd_fast_period: Option<u32>,
    pub macd_slow_period: Option<u32>,
    pub macd_signal_period: Option<u32>,
    pub macd_timeframe: Option<String>,
    pub volatility_period: Option<u32>,
    pub volatility_timeframe: Option<String>,
    pub volatility_adjustment: Option<f64>,
    pub profit_target: f64,
    pub trailing_stop_delta: Option<f64>,
    pub sell_offset: Option<f64>,
}

impl NewStrategy {
    pub fn into_strategy(self, id: i64, now: DateTime<Utc>) -> Strategy {
        Strategy {
            id,
            name: self.name,
            enabled: self.enabled,
            algorithm: self.algorithm,
            cron_expression: self.cron_expression,
            quote_amount: self.quote_amount,
            max_concurrent_orders: self.max_concurrent_orders,
            rsi_threshold: self.rsi_threshold,
            rsi_period: self.rsi_period,
            rsi_timeframe: self.rsi_timeframe,
            macd_fast_period: self.macd_fast_period,
            macd_slow_period: self.macd_slow_period,
            macd_signal_period: self.macd_signal_period,
            macd_timeframe: self.macd_timeframe,
            volatility_period: self.volatility_period,
            volatility_timeframe: self.volatility_timeframe,
            volatility_adjustment: self.volatility_adjustment,
            profit_target: self.profit_target,
            trailing_stop_delta: self.trailing_stop_delta,
            sell_offset: self.sell_offset,
            last_executed_at: None,
            next_execution_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A limit order placed on the exchange and tracked locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// Identifier assigned by the exchange.
    pub external_id: String,
    pub pair: String,
    pub side: OrderSide,
    pub amount: f64,
    pub price: f64,
    pub fees: f64,
    pub status: OrderStatus,
    pub strategy_id: i64,
    pub cycle_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub external_id: String,
    pub pair: String,
    pub side: OrderSide,
    pub amount: f64,
    pub price: f64,
    pub strategy_id: i64,
    pub cycle_id: Option<i64>,
}

/// Derived state of a cycle. Never stored; see [`CycleStatus::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    New,
    Open,
    Running,
    Completed,
}

impl CycleStatus {
    /// Status as a pure function of the buy and (optional) sell order status.
    ///
    /// The buy side governs: a cycle whose buy has not filled is `New`
    /// regardless of any sell linkage.
    pub fn derive(buy: OrderStatus, sell: Option<OrderStatus>) -> Self {
        match (buy, sell) {
            (OrderStatus::Filled, None) => CycleStatus::Open,
            (OrderStatus::Filled, Some(OrderStatus::Filled)) => CycleStatus::Completed,
            (OrderStatus::Filled, Some(_)) => CycleStatus::Running,
            (_, _) => CycleStatus::New,
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStatus::New => write!(f, "new"),
            CycleStatus::Open => write!(f, "open"),
            CycleStatus::Running => write!(f, "running"),
            CycleStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One buy-then-sell round trip, with both orders joined in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: i64,
    pub strategy_id: i64,
    pub buy_order: Order,
    pub sell_order: Option<Order>,
    pub target_price: f64,
    /// Highest price observed while the cycle is open.
    pub max_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cycle {
    pub fn status(&self) -> CycleStatus {
        CycleStatus::derive(
            self.buy_order.status,
            self.sell_order.as_ref().map(|o| o.status),
        )
    }

    /// Realized profit in quote currency; `None` until the cycle completes.
    pub fn profit(&self) -> Option<f64> {
        let sell = self.sell_order.as_ref()?;
        if self.status() != CycleStatus::Completed {
            return None;
        }
        let gross = (sell.price - self.buy_order.price) * self.buy_order.amount;
        Some(gross - self.buy_order.fees - sell.fees)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCycle {
    pub strategy_id: i64,
    pub buy_order_id: i64,
    pub target_price: f64,
    pub max_price: f64,
}

/// OHLCV candle, oldest-first when returned in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Order state as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub id: String,
    pub pair: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Limit price the order was placed at.
    pub price: f64,
    /// Average execution price, when any quantity has filled.
    pub average_price: Option<f64>,
    pub amount: f64,
    pub filled: f64,
    /// Fees in quote currency.
    pub fee: f64,
}

/// Free and locked amounts of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub free: f64,
    pub locked: f64,
}

/// Notifications emitted by the engine. Delivery is best-effort.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    BuyPlaced {
        strategy_id: i64,
        cycle_id: i64,
        price: f64,
        amount: f64,
    },
    SellPlaced {
        strategy_id: i64,
        cycle_id: i64,
        price: f64,
        reason: String,
    },
    CycleCompleted {
        strategy_id: i64,
        cycle_id: i64,
        profit: f64,
    },
    OrderCancelled {
        strategy_id: i64,
        order_id: i64,
        side: OrderSide,
    },
    ExecutionFailed {
        strategy_id: i64,
        error: String,
    },
}

impl std::fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeEvent::BuyPlaced { strategy_id, cycle_id, price, amount } => write!(
                f,
                "Strategy {strategy_id}: buy placed for cycle {cycle_id}, {amount} @ {price}"
            ),
            TradeEvent::SellPlaced { strategy_id, cycle_id, price, reason } => write!(
                f,
                "Strategy {strategy_id}: sell placed for cycle {cycle_id} @ {price} ({reason})"
            ),
            TradeEvent::CycleCompleted { strategy_id, cycle_id, profit } => write!(
                f,
                "Strategy {strategy_id}: cycle {cycle_id} completed, profit {profit:.4}"
            ),
            TradeEvent::OrderCancelled { strategy_id, order_id, side } => write!(
                f,
                "Strategy {strategy_id}: {side} order {order_id} was cancelled"
            ),
            TradeEvent::ExecutionFailed { strategy_id, error } => {
                write!(f, "Strategy {strategy_id}: execution failed: {error}")
            }
        }
    }
}
