use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Balance, Candle, Error, ExchangeGateway, ExchangeOrder, MarketPrecision, Result};
use proptest::prelude::*;
use risk::ResourceManager;

struct FixedBalance(f64);

#[async_trait]
impl ExchangeGateway for FixedBalance {
    async fn get_price(&self, _: &str) -> Result<f64> {
        Err(Error::Other("unused".into()))
    }
    async fn fetch_balance(&self, _: &str) -> Result<Balance> {
        Ok(Balance { free: self.0, locked: 0.0 })
    }
    async fn place_limit_buy_order(&self, _: &str, _: f64, _: f64) -> Result<String> {
        Err(Error::Other("unused".into()))
    }
    async fn place_limit_sell_order(&self, _: &str, _: f64, _: f64) -> Result<String> {
        Err(Error::Other("unused".into()))
    }
    async fn fetch_order(&self, _: &str, _: &str) -> Result<ExchangeOrder> {
        Err(Error::Other("unused".into()))
    }
    async fn cancel_order(&self, _: &str, _: &str) -> Result<()> {
        Err(Error::Other("unused".into()))
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

#[derive(Debug, Clone)]
enum Op {
    Reserve(f64),
    Release(f64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0.01f64..500.0).prop_map(Op::Reserve),
        (0.01f64..500.0).prop_map(Op::Release),
    ]
}

proptest! {
    /// Whatever the interleaving of grants and releases, the counter stays
    /// within [0, free balance].
    #[test]
    fn reserved_stays_within_balance(
        free in 0.0f64..1_000.0,
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let rm = ResourceManager::new(Arc::new(FixedBalance(free)), "USDT");
            for op in ops {
                match op {
                    Op::Reserve(amount) => {
                        let before = rm.reserved();
                        let granted = rm.reserve_balance(amount).await.unwrap();
                        assert_eq!(granted, free - before >= amount);
                    }
                    Op::Release(amount) => rm.release_balance(amount),
                }
                let reserved = rm.reserved();
                assert!(reserved >= 0.0);
                assert!(reserved <= free + 1e-9, "reserved {reserved} > free {free}");
            }
        });
    }

    /// Concurrent callers can never be granted more than the free balance.
    #[test]
    fn concurrent_grants_fit_the_balance(
        free in 1.0f64..1_000.0,
        amounts in proptest::collection::vec(1.0f64..200.0, 2..16),
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();
        rt.block_on(async {
            let rm = Arc::new(ResourceManager::new(Arc::new(FixedBalance(free)), "USDT"));
            let handles: Vec<_> = amounts
                .iter()
                .map(|&amount| {
                    let rm = rm.clone();
                    tokio::spawn(async move {
                        rm.reserve_balance(amount).await.unwrap().then_some(amount)
                    })
                })
                .collect();

            let mut total = 0.0;
            for h in handles {
                if let Some(amount) = h.await.unwrap() {
                    total += amount;
                }
            }
            assert!(total <= free + 1e-9, "granted {total} of {free}");
            assert!((rm.reserved() - total).abs() < 1e-6);
        });
    }
}
