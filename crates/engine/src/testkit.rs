//! In-memory doubles shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{
    Balance, Candle, Error, ExchangeGateway, ExchangeOrder, MarketPrecision, NewStrategy,
    OrderSide, OrderStatus, Result,
};
use strategy::{IndicatorSource, MacdReading};

/// Exchange double: fixed price and balance, orders kept in a map.
pub(crate) struct ScriptedGateway {
    price: Mutex<f64>,
    free_quote: Mutex<f64>,
    pub fail_buys: AtomicBool,
    pub fail_sells: AtomicBool,
    pub fail_precision: AtomicBool,
    pub buys: AtomicUsize,
    pub sells: AtomicUsize,
    orders: Mutex<HashMap<String, ExchangeOrder>>,
    next_id: AtomicU64,
}

impl ScriptedGateway {
    pub fn new(price: f64, free_quote: f64) -> Arc<Self> {
        Arc::new(Self {
            price: Mutex::new(price),
            free_quote: Mutex::new(free_quote),
            fail_buys: AtomicBool::new(false),
            fail_sells: AtomicBool::new(false),
            fail_precision: AtomicBool::new(false),
            buys: AtomicUsize::new(0),
            sells: AtomicUsize::new(0),
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    /// Mark an exchange order filled at `price` with `fee` paid.
    pub fn fill(&self, id: &str, price: f64, fee: f64) {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(id).expect("unknown order");
        order.status = OrderStatus::Filled;
        order.filled = order.amount;
        order.average_price = Some(price);
        order.fee = fee;
    }

    pub fn cancel(&self, id: &str) {
        let mut orders = self.orders.lock().unwrap();
        orders.get_mut(id).expect("unknown order").status = OrderStatus::Cancelled;
    }

    /// Register an order that exists on the exchange but was never placed
    /// through this double.
    pub fn insert(&self, order: ExchangeOrder) {
        self.orders.lock().unwrap().insert(order.id.clone(), order);
    }

    fn place(&self, pair: &str, side: OrderSide, amount: f64, price: f64) -> String {
        let id = format!("ex-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.insert(ExchangeOrder {
            id: id.clone(),
            pair: pair.to_string(),
            side,
            status: OrderStatus::Pending,
            price,
            average_price: None,
            amount,
            filled: 0.0,
            fee: 0.0,
        });
        id
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    async fn get_price(&self, _: &str) -> Result<f64> {
        Ok(*self.price.lock().unwrap())
    }

    async fn fetch_balance(&self, _: &str) -> Result<Balance> {
        Ok(Balance { free: *self.free_quote.lock().unwrap(), locked: 0.0 })
    }

    async fn place_limit_buy_order(&self, pair: &str, amount: f64, price: f64) -> Result<String> {
        if self.fail_buys.load(Ordering::SeqCst) {
            return Err(Error::Exchange("buy rejected".into()));
        }
        self.buys.fetch_add(1, Ordering::SeqCst);
        Ok(self.place(pair, OrderSide::Buy, amount, price))
    }

    async fn place_limit_sell_order(&self, pair: &str, amount: f64, price: f64) -> Result<String> {
        if self.fail_sells.load(Ordering::SeqCst) {
            return Err(Error::Exchange("sell rejected".into()));
        }
        self.sells.fetch_add(1, Ordering::SeqCst);
        Ok(self.place(pair, OrderSide::Sell, amount, price))
    }

    async fn fetch_order(&self, id: &str, _: &str) -> Result<ExchangeOrder> {
        self.orders
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("order {id}")))
    }

    async fn cancel_order(&self, id: &str, _: &str) -> Result<()> {
        self.cancel(id);
        Ok(())
    }

    async fn fetch_candles(
        &self,
        _: &str,
        _: &str,
        _: Option<DateTime<Utc>>,
        _: usize,
    ) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn market_precision(&self, _: &str) -> Result<MarketPrecision> {
        if self.fail_precision.load(Ordering::SeqCst) {
            return Err(Error::Http("timeout".into()));
        }
        Ok(MarketPrecision { price_decimals: 2, amount_decimals: 5, min_notional: 0.0 })
    }
}

/// Indicator double with a settable RSI.
pub(crate) struct FixedIndicators {
    rsi: Mutex<f64>,
}

impl FixedIndicators {
    pub fn new(rsi: f64) -> Arc<Self> {
        Arc::new(Self { rsi: Mutex::new(rsi) })
    }

    pub fn set_rsi(&self, rsi: f64) {
        *self.rsi.lock().unwrap() = rsi;
    }
}

#[async_trait]
impl IndicatorSource for FixedIndicators {
    async fn rsi(&self, _: &str, _: &str, _: u32) -> Result<f64> {
        Ok(*self.rsi.lock().unwrap())
    }

    async fn macd(&self, _: &str, _: &str, _: u32, _: u32, _: u32) -> Result<MacdReading> {
        Ok(MacdReading { macd: 0.0, signal: 0.0, histogram: 0.0, prev_histogram: 0.0 })
    }

    async fn volatility(&self, _: &str, _: &str, _: u32) -> Result<f64> {
        Ok(1.0)
    }
}

/// RSI-DCA every five minutes: 50 quote per buy, 2% target, 1% trailing stop.
pub(crate) fn rsi_strategy() -> NewStrategy {
    NewStrategy {
        name: "dip buyer".into(),
        enabled: true,
        algorithm: "rsi_dca".into(),
        cron_expression: "*/5 * * * *".into(),
        quote_amount: 50.0,
        max_concurrent_orders: 3,
        rsi_threshold: Some(35.0),
        rsi_period: Some(14),
        rsi_timeframe: Some("1h".into()),
        macd_fast_period: None,
        macd_slow_period: None,
        macd_signal_period: None,
        macd_timeframe: None,
        volatility_period: None,
        volatility_timeframe: None,
        volatility_adjustment: None,
        profit_target: 2.0,
        trailing_stop_delta: Some(1.0),
        sell_offset: None,
    }
}
