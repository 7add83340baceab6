use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use common::{
    Balance, Candle, Error, ExchangeGateway, ExchangeOrder, MarketPrecision, OrderSide,
    OrderStatus, Result,
};

/// Simulated exchange account for paper trading.
///
/// Market data (prices, candles, precision) comes from a real gateway; orders
/// and balances live in memory. A resting limit order fills at its limit price
/// the first time the market trades through it, which is checked whenever the
/// order or a balance is queried. No real orders are ever sent.
pub struct PaperExchange {
    market: Arc<dyn ExchangeGateway>,
    base_asset: String,
    quote_asset: String,
    /// Fee charged on every fill, as a fraction of notional (0.001 = 0.1%).
    fee_rate: f64,
    book: RwLock<Book>,
}

#[derive(Default)]
struct Book {
    balances: HashMap<String, Balance>,
    orders: HashMap<String, ExchangeOrder>,
}

impl Book {
    fn balance(&mut self, asset: &str) -> &mut Balance {
        self.balances.entry(asset.to_string()).or_default()
    }
}

impl PaperExchange {
    pub fn new(
        market: Arc<dyn ExchangeGateway>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        quote_balance: f64,
        fee_rate: f64,
    ) -> Self {
        let quote_asset = quote_asset.into();
        let mut book = Book::default();
        book.balance(&quote_asset).free = quote_balance;
        info!(balance = quote_balance, asset = %quote_asset, fee_rate, "PaperExchange initialized");
        Self {
            market,
            base_asset: base_asset.into(),
            quote_asset,
            fee_rate,
            book: RwLock::new(book),
        }
    }

    /// Fill every pending order on `pair` that the current price has crossed.
    async fn sweep(&self, pair: &str) -> Result<()> {
        let price = self.market.get_price(pair).await?;
        let mut book = self.book.write().await;

        let crossed: Vec<String> = book
            .orders
            .values()
            .filter(|o| o.pair == pair && o.status == OrderStatus::Pending)
            .filter(|o| match o.side {
                OrderSide::Buy => price <= o.price,
                OrderSide::Sell => price >= o.price,
            })
            .map(|o| o.id.clone())
            .collect();

        for id in crossed {
            let Some(order) = book.orders.get(&id).cloned() else {
                continue;
            };
            let notional = order.amount * order.price;
            let fee = notional * self.fee_rate;
            match order.side {
                OrderSide::Buy => {
                    let quote = book.balance(&self.quote_asset);
                    quote.locked = (quote.locked - notional).max(0.0);
                    quote.free -= fee;
                    book.balance(&self.base_asset).free += order.amount;
                }
                OrderSide::Sell => {
                    let base = book.balance(&self.base_asset);
                    base.locked = (base.locked - order.amount).max(0.0);
                    book.balance(&self.quote_asset).free += notional - fee;
                }
            }
            if let Some(o) = book.orders.get_mut(&id) {
                o.status = OrderStatus::Filled;
                o.filled = o.amount;
                o.average_price = Some(o.price);
                o.fee = fee;
            }
            debug!(order_id = %id, side = %order.side, price = order.price, fee, "Paper order filled");
        }
        Ok(())
    }

    async fn place(&self, pair: &str, side: OrderSide, amount: f64, price: f64) -> Result<String> {
        if amount <= 0.0 || price <= 0.0 {
            return Err(Error::Exchange(format!(
                "invalid order: amount {amount} at price {price}"
            )));
        }

        let mut book = self.book.write().await;
        let (asset, needed) = match side {
            OrderSide::Buy => (self.quote_asset.clone(), amount * price),
            OrderSide::Sell => (self.base_asset.clone(), amount),
        };
        let balance = book.balance(&asset);
        if balance.free < needed {
            return Err(Error::Exchange(format!(
                "Account has insufficient balance for requested action: need {needed} {asset}, have {}",
                balance.free
            )));
        }
        balance.free -= needed;
        balance.locked += needed;

        let id = Uuid::new_v4().to_string();
        book.orders.insert(
            id.clone(),
            ExchangeOrder {
                id: id.clone(),
                pair: pair.to_string(),
                side,
                status: OrderStatus::Pending,
                price,
                average_price: None,
                amount,
                filled: 0.0,
                fee: 0.0,
            },
        );
        info!(order_id = %id, %side, amount, price, "Paper order placed");
        Ok(id)
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn get_price(&self, pair: &str) -> Result<f64> {
        self.market.get_price(pair).await
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Balance> {
        let pairs: Vec<String> = {
            let book = self.book.read().await;
            let mut pairs: Vec<String> = book
                .orders
                .values()
                .filter(|o| o.status == OrderStatus::Pending)
                .map(|o| o.pair.clone())
                .collect();
            pairs.sort();
            pairs.dedup();
            pairs
        };
        for pair in pairs {
            self.sweep(&pair).await?;
        }
        Ok(self
            .book
            .read()
            .await
            .balances
            .get(asset)
            .copied()
            .unwrap_or_default())
    }

    async fn place_limit_buy_order(&self, pair: &str, amount: f64, price: f64) -> Result<String> {
        self.place(pair, OrderSide::Buy, amount, price).await
    }

    async fn place_limit_sell_order(
        &self,
        pair: &str,
        amount: f64,
        price: f64,
    ) -> Result<String> {
        self.place(pair, OrderSide::Sell, amount, price).await
    }

    async fn fetch_order(&self, id: &str, pair: &str) -> Result<ExchangeOrder> {
        self.sweep(pair).await?;
        self.book
            .read()
            .await
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("paper order {id}")))
    }

    async fn cancel_order(&self, id: &str, _pair: &str) -> Result<()> {
        let mut book = self.book.write().await;
        let order = book
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("paper order {id}")))?;
        if order.status != OrderStatus::Pending {
            return Err(Error::Exchange(format!("order {id} is {}", order.status)));
        }
        let (asset, held) = match order.side {
            OrderSide::Buy => (self.quote_asset.clone(), order.amount * order.price),
            OrderSide::Sell => (self.base_asset.clone(), order.amount),
        };
        let balance = book.balance(&asset);
        balance.locked = (balance.locked - held).max(0.0);
        balance.free += held;
        if let Some(o) = book.orders.get_mut(id) {
            o.status = OrderStatus::Cancelled;
        }
        info!(order_id = %id, "Paper order cancelled");
        Ok(())
    }

    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.market.fetch_candles(pair, timeframe, since, limit).await
    }

    async fn market_precision(&self, pair: &str) -> Result<MarketPrecision> {
        self.market.market_precision(pair).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Market {
        price: Mutex<f64>,
    }

    impl Market {
        fn at(price: f64) -> Arc<Self> {
            Arc::new(Self { price: Mutex::new(price) })
        }

        fn set(&self, price: f64) {
            *self.price.lock().unwrap() = price;
        }
    }

    #[async_trait]
    impl ExchangeGateway for Market {
        async fn get_price(&self, _: &str) -> Result<f64> {
            Ok(*self.price.lock().unwrap())
        }
        async fn fetch_balance(&self, _: &str) -> Result<Balance> {
            unreachable!("paper keeps its own balances")
        }
        async fn place_limit_buy_order(&self, _: &str, _: f64, _: f64) -> Result<String> {
            unreachable!("paper never forwards orders")
        }
        async fn place_limit_sell_order(&self, _: &str, _: f64, _: f64) -> Result<String> {
            unreachable!("paper never forwards orders")
        }
        async fn fetch_order(&self, _: &str, _: &str) -> Result<ExchangeOrder> {
            unreachable!("paper never forwards orders")
        }
        async fn cancel_order(&self, _: &str, _: &str) -> Result<()> {
            unreachable!("paper never forwards orders")
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
            Ok(MarketPrecision::default())
        }
    }

    fn exchange(market: Arc<Market>) -> PaperExchange {
        PaperExchange::new(market, "BTC", "USDT", 1_000.0, 0.001)
    }

    #[tokio::test]
    async fn buy_locks_quote_until_price_crosses() {
        let market = Market::at(100.0);
        let ex = exchange(market.clone());
        let id = ex.place_limit_buy_order("BTCUSDT", 2.0, 95.0).await.unwrap();

        let usdt = ex.fetch_balance("USDT").await.unwrap();
        assert_eq!(usdt.free, 810.0);
        assert_eq!(usdt.locked, 190.0);
        assert_eq!(ex.fetch_order(&id, "BTCUSDT").await.unwrap().status, OrderStatus::Pending);

        market.set(94.0);
        let order = ex.fetch_order(&id, "BTCUSDT").await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_price, Some(95.0));
        assert!((order.fee - 0.19).abs() < 1e-9);

        let usdt = ex.fetch_balance("USDT").await.unwrap();
        assert!((usdt.free - (810.0 - 0.19)).abs() < 1e-9);
        assert_eq!(usdt.locked, 0.0);
        assert_eq!(ex.fetch_balance("BTC").await.unwrap().free, 2.0);
    }

    #[tokio::test]
    async fn sell_credits_quote_net_of_fee() {
        let market = Market::at(100.0);
        let ex = exchange(market.clone());
        let buy = ex.place_limit_buy_order("BTCUSDT", 1.0, 100.0).await.unwrap();
        assert_eq!(ex.fetch_order(&buy, "BTCUSDT").await.unwrap().status, OrderStatus::Filled);

        let sell = ex.place_limit_sell_order("BTCUSDT", 1.0, 110.0).await.unwrap();
        assert_eq!(ex.fetch_balance("BTC").await.unwrap().locked, 1.0);
        market.set(111.0);
        assert_eq!(ex.fetch_order(&sell, "BTCUSDT").await.unwrap().status, OrderStatus::Filled);

        let usdt = ex.fetch_balance("USDT").await.unwrap();
        // 1000 - 100 - 0.1 fee + 110 - 0.11 fee
        assert!((usdt.free - 1_009.79).abs() < 1e-9);
        assert_eq!(ex.fetch_balance("BTC").await.unwrap(), Balance::default());
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected() {
        let ex = exchange(Market::at(100.0));
        let err = ex.place_limit_buy_order("BTCUSDT", 20.0, 100.0).await.unwrap_err();
        assert!(matches!(err, Error::Exchange(msg) if msg.contains("insufficient balance")));
        let err = ex.place_limit_sell_order("BTCUSDT", 1.0, 100.0).await.unwrap_err();
        assert!(matches!(err, Error::Exchange(_)));
    }

    #[tokio::test]
    async fn cancel_releases_locked_funds_once() {
        let ex = exchange(Market::at(100.0));
        let id = ex.place_limit_buy_order("BTCUSDT", 1.0, 90.0).await.unwrap();
        ex.cancel_order(&id, "BTCUSDT").await.unwrap();

        let usdt = ex.fetch_balance("USDT").await.unwrap();
        assert_eq!(usdt.free, 1_000.0);
        assert_eq!(usdt.locked, 0.0);
        assert_eq!(
            ex.fetch_order(&id, "BTCUSDT").await.unwrap().status,
            OrderStatus::Cancelled
        );
        assert!(ex.cancel_order(&id, "BTCUSDT").await.is_err());
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let ex = exchange(Market::at(100.0));
        assert!(matches!(
            ex.fetch_order("nope", "BTCUSDT").await,
            Err(Error::NotFound(_))
        ));
    }
}
