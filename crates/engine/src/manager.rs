use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use common::{
    Cycle, CycleStatus, ExchangeGateway, NewCycle, NewOrder, OrderSide, Result, Store, Strategy,
    TradeEvent,
};
use risk::ResourceManager;
use strategy::{Algorithm, AlgorithmRegistry, BuySignal, TradingContext};

/// Outcome of one strategy execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub strategy_id: i64,
    /// Why the execution stopped early, if it did.
    pub skipped: Option<String>,
    pub buy_order_id: Option<i64>,
    pub cycle_id: Option<i64>,
    /// Cycles that had a sell placed.
    pub sells_placed: Vec<i64>,
    /// Per-cycle failures that did not abort the execution.
    pub failures: Vec<String>,
}

impl ExecutionReport {
    fn new(strategy_id: i64) -> Self {
        Self { strategy_id, ..Self::default() }
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skipped = Some(reason.into());
        self
    }
}

/// Runs the buy/sell decision loop for a strategy against the exchange.
///
/// Buys go through the [`ResourceManager`] so concurrently firing strategies
/// never commit more quote currency than the account holds. Sells are guarded
/// by a per-cycle claim shared with the order monitor.
pub struct StrategyManager {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ExchangeGateway>,
    registry: Arc<AlgorithmRegistry>,
    resources: Arc<ResourceManager>,
    pair: String,
    events: Option<mpsc::Sender<TradeEvent>>,
    claims: Mutex<HashSet<i64>>,
}

/// Exclusive right to place a sell for one cycle; released on drop.
struct CycleClaim<'a> {
    claims: &'a Mutex<HashSet<i64>>,
    cycle_id: i64,
}

impl Drop for CycleClaim<'_> {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.cycle_id);
    }
}

impl StrategyManager {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ExchangeGateway>,
        registry: Arc<AlgorithmRegistry>,
        resources: Arc<ResourceManager>,
        pair: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            registry,
            resources,
            pair: pair.into(),
            events: None,
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// Publish trade events on `tx`. Delivery is best-effort.
    pub fn with_events(mut self, tx: mpsc::Sender<TradeEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub(crate) fn emit(&self, event: TradeEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "Trade event dropped");
            }
        }
    }

    fn claim(&self, cycle_id: i64) -> Option<CycleClaim<'_>> {
        let inserted = self
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cycle_id);
        inserted.then(|| CycleClaim {
            claims: &self.claims,
            cycle_id,
        })
    }

    async fn context(&self, strategy: &Strategy) -> Result<TradingContext> {
        let price = self.gateway.get_price(&self.pair).await?;
        let quote_balance = self
            .gateway
            .fetch_balance(self.resources.quote_asset())
            .await?
            .free;
        let precision = self.gateway.market_precision(&self.pair).await?;
        let open_cycles = self.store.get_open_cycles_for_strategy(strategy.id).await?;
        Ok(TradingContext {
            pair: self.pair.clone(),
            price,
            quote_balance,
            open_cycles,
            precision,
        })
    }

    /// One scheduled firing: maybe buy, then manage the strategy's open cycles.
    pub async fn execute_strategy(&self, strategy: &Strategy) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::new(strategy.id);
        let algorithm = self.registry.for_strategy(strategy)?;

        let active = self.store.count_active_orders_for_strategy(strategy.id).await?;
        if active >= strategy.max_concurrent_orders {
            debug!(
                strategy_id = strategy.id,
                active,
                max = strategy.max_concurrent_orders,
                "Concurrent order limit reached"
            );
            return Ok(report.skip(format!(
                "{active} active orders (max {})",
                strategy.max_concurrent_orders
            )));
        }

        let ctx = self.context(strategy).await?;

        let signal = algorithm.should_buy(&ctx, strategy).await?;
        if signal.should_buy {
            self.buy(strategy, &signal, &mut report).await?;
        } else {
            debug!(strategy_id = strategy.id, reason = %signal.reason, "No buy");
        }

        self.sell_cycles(algorithm.as_ref(), &ctx, strategy, &mut report)
            .await;
        Ok(report)
    }

    /// Evaluate sells and high-water marks for a strategy's open cycles
    /// without considering a new buy.
    pub async fn process_open_cycles(&self, strategy: &Strategy) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::new(strategy.id);
        let algorithm = self.registry.for_strategy(strategy)?;
        let ctx = self.context(strategy).await?;
        self.sell_cycles(algorithm.as_ref(), &ctx, strategy, &mut report)
            .await;
        Ok(report)
    }

    async fn buy(
        &self,
        strategy: &Strategy,
        signal: &BuySignal,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let Some(reservation) = self.resources.reserve(strategy.quote_amount).await? else {
            info!(
                strategy_id = strategy.id,
                amount = strategy.quote_amount,
                "Insufficient free balance, skipping buy"
            );
            report.skipped = Some("insufficient free balance".into());
            return Ok(());
        };

        let placed = self
            .gateway
            .place_limit_buy_order(&self.pair, signal.amount, signal.limit_price)
            .await;
        // Placed or not, the exchange balance is now authoritative.
        drop(reservation);
        let external_id = placed.map_err(|e| {
            error!(strategy_id = strategy.id, error = %e, "Buy order placement failed");
            e
        })?;

        let order = self
            .store
            .create_order(NewOrder {
                external_id,
                pair: self.pair.clone(),
                side: OrderSide::Buy,
                amount: signal.amount,
                price: signal.limit_price,
                strategy_id: strategy.id,
                cycle_id: None,
            })
            .await?;
        let cycle = self
            .store
            .create_cycle(NewCycle {
                strategy_id: strategy.id,
                buy_order_id: order.id,
                target_price: signal.target_price,
                max_price: signal.limit_price,
            })
            .await?;

        info!(
            strategy_id = strategy.id,
            cycle_id = cycle.id,
            order_id = order.id,
            price = signal.limit_price,
            amount = signal.amount,
            target = signal.target_price,
            reason = %signal.reason,
            "Buy order placed"
        );
        report.buy_order_id = Some(order.id);
        report.cycle_id = Some(cycle.id);
        self.emit(TradeEvent::BuyPlaced {
            strategy_id: strategy.id,
            cycle_id: cycle.id,
            price: signal.limit_price,
            amount: signal.amount,
        });
        Ok(())
    }

    async fn sell_cycles(
        &self,
        algorithm: &dyn Algorithm,
        ctx: &TradingContext,
        strategy: &Strategy,
        report: &mut ExecutionReport,
    ) {
        for cycle in ctx.open_cycles.iter().filter(|c| c.status() == CycleStatus::Open) {
            match self.sell_cycle(algorithm, ctx, cycle, strategy).await {
                Ok(true) => report.sells_placed.push(cycle.id),
                Ok(false) => {
                    if let Err(e) = self.store.update_cycle_max_price(cycle.id, ctx.price).await {
                        warn!(cycle_id = cycle.id, error = %e, "Failed to raise max price");
                        report.failures.push(format!("cycle {}: {e}", cycle.id));
                    }
                }
                Err(e) => {
                    error!(
                        strategy_id = strategy.id,
                        cycle_id = cycle.id,
                        error = %e,
                        "Sell handling failed"
                    );
                    report.failures.push(format!("cycle {}: {e}", cycle.id));
                }
            }
        }
    }

    /// Returns whether a sell was placed.
    async fn sell_cycle(
        &self,
        algorithm: &dyn Algorithm,
        ctx: &TradingContext,
        cycle: &Cycle,
        strategy: &Strategy,
    ) -> Result<bool> {
        let Some(_claim) = self.claim(cycle.id) else {
            debug!(cycle_id = cycle.id, "Cycle claimed elsewhere, skipping");
            return Ok(false);
        };
        // Re-read under the claim; another task may have sold it already.
        let Some(cycle) = self.store.get_cycle(cycle.id).await? else {
            return Ok(false);
        };
        if cycle.status() != CycleStatus::Open {
            return Ok(false);
        }

        let signal = algorithm.should_sell(ctx, &cycle, strategy).await?;
        if !signal.should_sell {
            debug!(cycle_id = cycle.id, reason = %signal.reason, "Holding");
            return Ok(false);
        }

        let amount = cycle.buy_order.amount;
        let external_id = self
            .gateway
            .place_limit_sell_order(&self.pair, amount, signal.limit_price)
            .await?;
        let order = self
            .store
            .create_order(NewOrder {
                external_id,
                pair: self.pair.clone(),
                side: OrderSide::Sell,
                amount,
                price: signal.limit_price,
                strategy_id: strategy.id,
                cycle_id: Some(cycle.id),
            })
            .await?;
        if !self.store.update_cycle_sell_order(cycle.id, order.id).await? {
            warn!(cycle_id = cycle.id, order_id = order.id, "Cycle already had a sell attached");
            return Ok(false);
        }

        info!(
            strategy_id = strategy.id,
            cycle_id = cycle.id,
            order_id = order.id,
            price = signal.limit_price,
            amount,
            reason = %signal.reason,
            "Sell order placed"
        );
        self.emit(TradeEvent::SellPlaced {
            strategy_id: strategy.id,
            cycle_id: cycle.id,
            price: signal.limit_price,
            reason: signal.reason,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{rsi_strategy, FixedIndicators, ScriptedGateway};
    use common::{Error, MemoryStore, OrderStatus};
    use std::sync::atomic::Ordering;

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<ScriptedGateway>,
        indicators: Arc<FixedIndicators>,
        resources: Arc<ResourceManager>,
        manager: StrategyManager,
        events: mpsc::Receiver<TradeEvent>,
    }

    fn harness(price: f64, free_quote: f64, rsi: f64) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = ScriptedGateway::new(price, free_quote);
        let indicators = FixedIndicators::new(rsi);
        let registry = Arc::new(AlgorithmRegistry::new(indicators.clone()));
        let resources = Arc::new(ResourceManager::new(gateway.clone(), "USDT"));
        let (tx, events) = mpsc::channel(16);
        let manager = StrategyManager::new(
            store.clone(),
            gateway.clone(),
            registry,
            resources.clone(),
            "BTCUSDT",
        )
        .with_events(tx);
        Harness { store, gateway, indicators, resources, manager, events }
    }

    /// Buy at `buy_price`, filled, with the given target and high-water mark.
    async fn open_cycle(h: &Harness, strategy_id: i64, buy_price: f64, target: f64) -> Cycle {
        let order = h
            .store
            .create_order(NewOrder {
                external_id: format!("seed-{buy_price}-{target}"),
                pair: "BTCUSDT".into(),
                side: OrderSide::Buy,
                amount: 0.5,
                price: buy_price,
                strategy_id,
                cycle_id: None,
            })
            .await
            .unwrap();
        h.store
            .update_order_status(order.id, OrderStatus::Filled, buy_price, 0.0)
            .await
            .unwrap();
        h.store
            .create_cycle(NewCycle {
                strategy_id,
                buy_order_id: order.id,
                target_price: target,
                max_price: buy_price,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn oversold_market_places_buy_and_cycle() {
        let mut h = harness(100.0, 1_000.0, 20.0);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();

        let report = h.manager.execute_strategy(&s).await.unwrap();
        assert_eq!(report.skipped, None);
        let cycle_id = report.cycle_id.expect("cycle created");

        let cycle = h.store.get_cycle(cycle_id).await.unwrap().unwrap();
        assert_eq!(cycle.status(), CycleStatus::New);
        assert!(cycle.target_price > cycle.buy_order.price);
        assert_eq!(cycle.buy_order.cycle_id, Some(cycle_id));
        // Released at the commit point.
        assert_eq!(h.resources.reserved(), 0.0);
        assert!(matches!(h.events.try_recv(), Ok(TradeEvent::BuyPlaced { .. })));
    }

    #[tokio::test]
    async fn rsi_above_threshold_does_not_buy() {
        let h = harness(100.0, 1_000.0, 60.0);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();

        let report = h.manager.execute_strategy(&s).await.unwrap();
        assert_eq!(report.buy_order_id, None);
        assert_eq!(h.gateway.buys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_placement_releases_reservation_and_surfaces_error() {
        let h = harness(100.0, 1_000.0, 20.0);
        h.gateway.fail_buys.store(true, Ordering::SeqCst);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();

        let err = h.manager.execute_strategy(&s).await.unwrap_err();
        assert!(matches!(err, Error::Exchange(_)));
        assert_eq!(h.resources.reserved(), 0.0);
        assert!(h.store.get_pending_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insufficient_balance_is_a_skip() {
        let h = harness(100.0, 10.0, 20.0);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();

        let report = h.manager.execute_strategy(&s).await.unwrap();
        assert_eq!(report.skipped.as_deref(), Some("insufficient free balance"));
        assert_eq!(h.gateway.buys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_order_limit_skips_execution() {
        let h = harness(100.0, 1_000.0, 20.0);
        let mut new = rsi_strategy();
        new.max_concurrent_orders = 1;
        let s = h.store.create_strategy(new).await.unwrap();

        h.manager.execute_strategy(&s).await.unwrap();
        let second = h.manager.execute_strategy(&s).await.unwrap();
        assert!(second.skipped.is_some());
        assert_eq!(h.gateway.buys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_algorithm_is_an_error() {
        let h = harness(100.0, 1_000.0, 20.0);
        let mut new = rsi_strategy();
        new.algorithm = "grid".into();
        let s = h.store.create_strategy(new).await.unwrap();
        assert!(matches!(h.manager.execute_strategy(&s).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn trailing_stop_sells_once() {
        let h = harness(110.0, 1_000.0, 60.0);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = open_cycle(&h, s.id, 100.0, 102.0).await;

        // Rally to 110 raises the high-water mark without selling.
        let report = h.manager.process_open_cycles(&s).await.unwrap();
        assert!(report.sells_placed.is_empty());
        let stored = h.store.get_cycle(cycle.id).await.unwrap().unwrap();
        assert_eq!(stored.max_price, 110.0);

        // 108.5 is below 110 × 0.99.
        h.gateway.set_price(108.5);
        let report = h.manager.execute_strategy(&s).await.unwrap();
        assert_eq!(report.sells_placed, vec![cycle.id]);
        let stored = h.store.get_cycle(cycle.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), CycleStatus::Running);
        assert_eq!(stored.sell_order.as_ref().unwrap().amount, 0.5);

        // Running cycles are not sold again.
        h.gateway.set_price(100.0);
        h.indicators.set_rsi(60.0);
        h.manager.process_open_cycles(&s).await.unwrap();
        assert_eq!(h.gateway.sells.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn max_price_never_decreases() {
        let h = harness(101.0, 1_000.0, 60.0);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = open_cycle(&h, s.id, 100.0, 102.0).await;

        for price in [101.0, 99.0, 101.5, 100.0] {
            h.gateway.set_price(price);
            h.manager.process_open_cycles(&s).await.unwrap();
        }
        let stored = h.store.get_cycle(cycle.id).await.unwrap().unwrap();
        assert_eq!(stored.max_price, 101.5);
    }

    #[tokio::test]
    async fn sell_failure_is_recorded_per_cycle() {
        let h = harness(108.5, 1_000.0, 60.0);
        h.gateway.fail_sells.store(true, Ordering::SeqCst);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();
        let a = open_cycle(&h, s.id, 100.0, 102.0).await;
        let b = open_cycle(&h, s.id, 100.0, 103.0).await;
        h.store.update_cycle_max_price(a.id, 110.0).await.unwrap();
        h.store.update_cycle_max_price(b.id, 110.0).await.unwrap();

        let report = h.manager.process_open_cycles(&s).await.unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(report.sells_placed.is_empty());
    }

    #[tokio::test]
    async fn claimed_cycle_is_skipped() {
        let h = harness(108.5, 1_000.0, 60.0);
        let s = h.store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = open_cycle(&h, s.id, 100.0, 102.0).await;
        h.store.update_cycle_max_price(cycle.id, 110.0).await.unwrap();

        let claim = h.manager.claim(cycle.id).expect("first claim");
        let report = h.manager.process_open_cycles(&s).await.unwrap();
        assert!(report.sells_placed.is_empty());
        drop(claim);

        let report = h.manager.process_open_cycles(&s).await.unwrap();
        assert_eq!(report.sells_placed, vec![cycle.id]);
    }
}
