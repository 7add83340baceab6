use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    Cycle, CycleStatus, Error, NewCycle, NewOrder, NewStrategy, Order, OrderStatus, Result,
    Strategy,
};

/// Persistence used by the engine: plain create/read/update keyed by integer id.
///
/// `SqliteStore` (crates/engine) is the production implementation and
/// [`MemoryStore`] backs tests and dry runs.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Strategies ──────────────────────────────────────────────────────────
    async fn create_strategy(&self, new: NewStrategy) -> Result<Strategy>;
    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>>;
    async fn list_strategies(&self) -> Result<Vec<Strategy>>;
    async fn get_enabled_strategies(&self) -> Result<Vec<Strategy>>;
    async fn set_strategy_enabled(&self, id: i64, enabled: bool) -> Result<()>;
    async fn update_strategy_execution(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
    async fn update_strategy_next_execution(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    // ── Orders ──────────────────────────────────────────────────────────────
    async fn create_order(&self, new: NewOrder) -> Result<Order>;
    async fn get_order(&self, id: i64) -> Result<Option<Order>>;
    async fn get_pending_orders(&self) -> Result<Vec<Order>>;
    /// Record an exchange-side status change together with the executed
    /// price and fees.
    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
        price: f64,
        fees: f64,
    ) -> Result<()>;
    async fn count_active_orders_for_strategy(&self, strategy_id: i64) -> Result<i64>;

    // ── Cycles ──────────────────────────────────────────────────────────────
    /// Insert a cycle and link its buy order to it.
    async fn create_cycle(&self, new: NewCycle) -> Result<Cycle>;
    async fn get_cycle(&self, id: i64) -> Result<Option<Cycle>>;
    async fn get_cycle_by_buy_order(&self, buy_order_id: i64) -> Result<Option<Cycle>>;
    /// Cycles that are not yet completed.
    async fn get_open_cycles_for_strategy(&self, strategy_id: i64) -> Result<Vec<Cycle>>;
    async fn get_completed_cycles_for_strategy(&self, strategy_id: i64) -> Result<Vec<Cycle>>;
    /// Raise the high-water mark. Never lowers it; returns whether it moved.
    async fn update_cycle_max_price(&self, id: i64, price: f64) -> Result<bool>;
    async fn update_cycle_target_price(&self, id: i64, price: f64) -> Result<()>;
    /// Attach the sell order. Returns `false` if the cycle already has one.
    async fn update_cycle_sell_order(&self, id: i64, sell_order_id: i64) -> Result<bool>;
    async fn delete_cycle(&self, id: i64) -> Result<()>;
}

#[derive(Debug, Clone)]
struct CycleRow {
    id: i64,
    strategy_id: i64,
    buy_order_id: i64,
    sell_order_id: Option<i64>,
    target_price: f64,
    max_price: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    strategies: BTreeMap<i64, Strategy>,
    orders: BTreeMap<i64, Order>,
    cycles: BTreeMap<i64, CycleRow>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn join(&self, row: &CycleRow) -> Result<Cycle> {
        let buy_order = self
            .orders
            .get(&row.buy_order_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("buy order {}", row.buy_order_id)))?;
        let sell_order = match row.sell_order_id {
            Some(id) => Some(
                self.orders
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("sell order {id}")))?,
            ),
            None => None,
        };
        Ok(Cycle {
            id: row.id,
            strategy_id: row.strategy_id,
            buy_order,
            sell_order,
            target_price: row.target_price,
            max_price: row.max_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn strategy_mut(&mut self, id: i64) -> Result<&mut Strategy> {
        self.strategies
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("strategy {id}")))
    }

    fn cycle_mut(&mut self, id: i64) -> Result<&mut CycleRow> {
        self.cycles
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("cycle {id}")))
    }
}

/// In-process [`Store`] with the same semantics as the SQLite store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_strategy(&self, new: NewStrategy) -> Result<Strategy> {
        let mut t = self.tables.write().await;
        let id = t.next_id();
        let strategy = new.into_strategy(id, Utc::now());
        t.strategies.insert(id, strategy.clone());
        Ok(strategy)
    }

    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        Ok(self.tables.read().await.strategies.get(&id).cloned())
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self.tables.read().await.strategies.values().cloned().collect())
    }

    async fn get_enabled_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self
            .tables
            .read()
            .await
            .strategies
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn set_strategy_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let mut t = self.tables.write().await;
        let s = t.strategy_mut(id)?;
        s.enabled = enabled;
        s.updated_at = Utc::now();
        Ok(())
    }

    async fn update_strategy_execution(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut t = self.tables.write().await;
        let s = t.strategy_mut(id)?;
        s.last_executed_at = Some(at);
        s.updated_at = Utc::now();
        Ok(())
    }

    async fn update_strategy_next_execution(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut t = self.tables.write().await;
        let s = t.strategy_mut(id)?;
        s.next_execution_at = Some(at);
        s.updated_at = Utc::now();
        Ok(())
    }

    async fn create_order(&self, new: NewOrder) -> Result<Order> {
        let mut t = self.tables.write().await;
        if t.orders.values().any(|o| o.external_id == new.external_id) {
            return Err(Error::Other(format!(
                "order with external id {} already exists",
                new.external_id
            )));
        }
        let id = t.next_id();
        let now = Utc::now();
        let order = Order {
            id,
            external_id: new.external_id,
            pair: new.pair,
            side: new.side,
            amount: new.amount,
            price: new.price,
            fees: 0.0,
            status: OrderStatus::Pending,
            strategy_id: new.strategy_id,
            cycle_id: new.cycle_id,
            created_at: now,
            updated_at: now,
        };
        t.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn get_pending_orders(&self) -> Result<Vec<Order>> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
        price: f64,
        fees: f64,
    ) -> Result<()> {
        let mut t = self.tables.write().await;
        let order = t
            .orders
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("order {id}")))?;
        order.status = status;
        order.price = price;
        order.fees = fees;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn count_active_orders_for_strategy(&self, strategy_id: i64) -> Result<i64> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.strategy_id == strategy_id && o.status == OrderStatus::Pending)
            .count() as i64)
    }

    async fn create_cycle(&self, new: NewCycle) -> Result<Cycle> {
        let mut t = self.tables.write().await;
        if !t.orders.contains_key(&new.buy_order_id) {
            return Err(Error::NotFound(format!("buy order {}", new.buy_order_id)));
        }
        if t.cycles.values().any(|c| c.buy_order_id == new.buy_order_id) {
            return Err(Error::Other(format!(
                "buy order {} already has a cycle",
                new.buy_order_id
            )));
        }
        let id = t.next_id();
        let now = Utc::now();
        let row = CycleRow {
            id,
            strategy_id: new.strategy_id,
            buy_order_id: new.buy_order_id,
            sell_order_id: None,
            target_price: new.target_price,
            max_price: new.max_price,
            created_at: now,
            updated_at: now,
        };
        if let Some(order) = t.orders.get_mut(&new.buy_order_id) {
            order.cycle_id = Some(id);
        }
        t.cycles.insert(id, row.clone());
        t.join(&row)
    }

    async fn get_cycle(&self, id: i64) -> Result<Option<Cycle>> {
        let t = self.tables.read().await;
        t.cycles.get(&id).map(|row| t.join(row)).transpose()
    }

    async fn get_cycle_by_buy_order(&self, buy_order_id: i64) -> Result<Option<Cycle>> {
        let t = self.tables.read().await;
        t.cycles
            .values()
            .find(|row| row.buy_order_id == buy_order_id)
            .map(|row| t.join(row))
            .transpose()
    }

    async fn get_open_cycles_for_strategy(&self, strategy_id: i64) -> Result<Vec<Cycle>> {
        let t = self.tables.read().await;
        let mut cycles = Vec::new();
        for row in t.cycles.values().filter(|r| r.strategy_id == strategy_id) {
            let cycle = t.join(row)?;
            if cycle.status() != CycleStatus::Completed {
                cycles.push(cycle);
            }
        }
        Ok(cycles)
    }

    async fn get_completed_cycles_for_strategy(&self, strategy_id: i64) -> Result<Vec<Cycle>> {
        let t = self.tables.read().await;
        let mut cycles = Vec::new();
        for row in t.cycles.values().filter(|r| r.strategy_id == strategy_id) {
            let cycle = t.join(row)?;
            if cycle.status() == CycleStatus::Completed {
                cycles.push(cycle);
            }
        }
        Ok(cycles)
    }

    async fn update_cycle_max_price(&self, id: i64, price: f64) -> Result<bool> {
        let mut t = self.tables.write().await;
        let row = t.cycle_mut(id)?;
        if price > row.max_price {
            row.max_price = price;
            row.updated_at = Utc::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn update_cycle_target_price(&self, id: i64, price: f64) -> Result<()> {
        let mut t = self.tables.write().await;
        let row = t.cycle_mut(id)?;
        row.target_price = price;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn update_cycle_sell_order(&self, id: i64, sell_order_id: i64) -> Result<bool> {
        let mut t = self.tables.write().await;
        let row = t.cycle_mut(id)?;
        if row.sell_order_id.is_some() {
            return Ok(false);
        }
        row.sell_order_id = Some(sell_order_id);
        row.updated_at = Utc::now();
        if let Some(order) = t.orders.get_mut(&sell_order_id) {
            order.cycle_id = Some(id);
        }
        Ok(true)
    }

    async fn delete_cycle(&self, id: i64) -> Result<()> {
        let mut t = self.tables.write().await;
        let row = t
            .cycles
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("cycle {id}")))?;
        for order in t.orders.values_mut() {
            if order.cycle_id == Some(row.id) {
                order.cycle_id = None;
            }
        }
        Ok(())
    }
}
