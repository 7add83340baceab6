use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use common::{
    CycleStatus, ExchangeGateway, ExchangeOrder, MarketPrecision, NewCycle, Order, OrderSide,
    OrderStatus, Result, Store, TradeEvent,
};

use crate::manager::StrategyManager;

/// Counts from one order-check pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub checked: usize,
    pub filled: usize,
    pub cancelled: usize,
    pub cycles_created: usize,
    pub cycles_deleted: usize,
    pub errors: usize,
}

/// Fixed-interval loop that syncs pending orders with the exchange and
/// re-evaluates open cycles against the latest price.
///
/// Every pass is idempotent: orders are matched by exchange id and a status
/// is only written once it leaves `Pending`.
pub struct OrderMonitor {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ExchangeGateway>,
    manager: Arc<StrategyManager>,
    interval: Duration,
    events: Option<mpsc::Sender<TradeEvent>>,
}

impl OrderMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ExchangeGateway>,
        manager: Arc<StrategyManager>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            manager,
            interval,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<TradeEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: TradeEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "Trade event dropped");
            }
        }
    }

    /// Run until `shutdown` flips to `true`. Call from `tokio::spawn`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "OrderMonitor running");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.check_orders().await {
                Ok(summary) if summary.checked > 0 => info!(?summary, "Order check complete"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Order check failed"),
            }
            if let Err(e) = self.check_prices().await {
                error!(error = %e, "Price check failed");
            }
        }
        info!("OrderMonitor stopped");
    }

    /// Sync every pending order with its exchange-side state.
    pub async fn check_orders(&self) -> Result<CheckSummary> {
        let pending = self.store.get_pending_orders().await?;
        let mut summary = CheckSummary::default();
        let mut precisions: HashMap<String, MarketPrecision> = HashMap::new();

        for order in pending {
            summary.checked += 1;
            let remote = match self.gateway.fetch_order(&order.external_id, &order.pair).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(order_id = order.id, external_id = %order.external_id, error = %e, "Order fetch failed");
                    summary.errors += 1;
                    continue;
                }
            };

            let result = match remote.status {
                OrderStatus::Pending => Ok(()),
                OrderStatus::Filled => match self.precision(&mut precisions, &order.pair).await {
                    Ok(precision) => {
                        summary.filled += 1;
                        self.on_filled(&order, &remote, &precision, &mut summary).await
                    }
                    Err(e) => Err(e),
                },
                OrderStatus::Cancelled => {
                    summary.cancelled += 1;
                    self.on_cancelled(&order, &remote, &mut summary).await
                }
            };
            if let Err(e) = result {
                error!(order_id = order.id, error = %e, "Order reconciliation failed");
                summary.errors += 1;
            }
        }
        Ok(summary)
    }

    async fn precision(
        &self,
        cache: &mut HashMap<String, MarketPrecision>,
        pair: &str,
    ) -> Result<MarketPrecision> {
        if let Some(p) = cache.get(pair) {
            return Ok(*p);
        }
        let p = self.gateway.market_precision(pair).await?;
        cache.insert(pair.to_string(), p);
        Ok(p)
    }

    async fn on_filled(
        &self,
        order: &Order,
        remote: &ExchangeOrder,
        precision: &MarketPrecision,
        summary: &mut CheckSummary,
    ) -> Result<()> {
        let fill_price = remote.average_price.unwrap_or(remote.price);
        self.store
            .update_order_status(order.id, OrderStatus::Filled, fill_price, remote.fee)
            .await?;
        info!(
            order_id = order.id,
            side = %order.side,
            price = fill_price,
            fee = remote.fee,
            "Order filled"
        );

        match order.side {
            OrderSide::Buy => match self.store.get_cycle_by_buy_order(order.id).await? {
                Some(cycle) => {
                    // Keep the target ratio against the actual fill.
                    if order.price > 0.0 && fill_price != order.price {
                        let target =
                            precision.round_price(fill_price * cycle.target_price / order.price);
                        self.store.update_cycle_target_price(cycle.id, target).await?;
                        debug!(cycle_id = cycle.id, target, "Target refined to fill price");
                    }
                }
                None => {
                    let Some(strategy) = self.store.get_strategy(order.strategy_id).await? else {
                        warn!(order_id = order.id, "Filled buy belongs to no known strategy");
                        return Ok(());
                    };
                    let target =
                        precision.round_price(fill_price * (1.0 + strategy.profit_target / 100.0));
                    let cycle = self
                        .store
                        .create_cycle(NewCycle {
                            strategy_id: strategy.id,
                            buy_order_id: order.id,
                            target_price: target,
                            max_price: fill_price,
                        })
                        .await?;
                    summary.cycles_created += 1;
                    warn!(
                        order_id = order.id,
                        cycle_id = cycle.id,
                        target,
                        "Created missing cycle for filled buy"
                    );
                }
            },
            OrderSide::Sell => {
                let Some(cycle_id) = order.cycle_id else {
                    warn!(order_id = order.id, "Filled sell is not attached to a cycle");
                    return Ok(());
                };
                if let Some(cycle) = self.store.get_cycle(cycle_id).await? {
                    if cycle.status() == CycleStatus::Completed {
                        let profit = cycle.profit().unwrap_or(0.0);
                        info!(strategy_id = cycle.strategy_id, cycle_id, profit, "Cycle completed");
                        self.emit(TradeEvent::CycleCompleted {
                            strategy_id: cycle.strategy_id,
                            cycle_id,
                            profit,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_cancelled(
        &self,
        order: &Order,
        remote: &ExchangeOrder,
        summary: &mut CheckSummary,
    ) -> Result<()> {
        if remote.filled > 0.0 {
            warn!(
                order_id = order.id,
                filled = remote.filled,
                amount = remote.amount,
                "Cancelled order was partially filled"
            );
        }
        self.store
            .update_order_status(order.id, OrderStatus::Cancelled, order.price, remote.fee)
            .await?;

        match order.side {
            OrderSide::Buy => {
                if let Some(cycle) = self.store.get_cycle_by_buy_order(order.id).await? {
                    self.store.delete_cycle(cycle.id).await?;
                    summary.cycles_deleted += 1;
                    info!(order_id = order.id, cycle_id = cycle.id, "Buy cancelled, cycle removed");
                }
            }
            OrderSide::Sell => {
                // The sell link is permanent; the cycle stays Running for the operator.
                warn!(
                    order_id = order.id,
                    cycle_id = ?order.cycle_id,
                    "Sell cancelled, cycle needs manual attention"
                );
            }
        }
        self.emit(TradeEvent::OrderCancelled {
            strategy_id: order.strategy_id,
            order_id: order.id,
            side: order.side,
        });
        Ok(())
    }

    /// Re-run sell evaluation for every strategy holding open cycles.
    ///
    /// Disabled strategies are included: disabling stops new buys, not exits.
    pub async fn check_prices(&self) -> Result<()> {
        for strategy in self.store.list_strategies().await? {
            if self.store.get_open_cycles_for_strategy(strategy.id).await?.is_empty() {
                continue;
            }
            match self.manager.process_open_cycles(&strategy).await {
                Ok(report) if !report.sells_placed.is_empty() => info!(
                    strategy_id = strategy.id,
                    sells = report.sells_placed.len(),
                    "Sells placed by price check"
                ),
                Ok(_) => {}
                Err(e) => warn!(strategy_id = strategy.id, error = %e, "Price check failed"),
            }
        }
        Ok(())
    }
}
