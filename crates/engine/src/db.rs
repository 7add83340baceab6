use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use common::{
    Cycle, CycleStatus, Error, NewCycle, NewOrder, NewStrategy, Order, OrderSide, OrderStatus,
    Result, Store, Strategy,
};

const STRATEGY_COLUMNS: &str = "id, name, enabled, algorithm, cron_expression, quote_amount, \
    max_concurrent_orders, rsi_threshold, rsi_period, rsi_timeframe, macd_fast_period, \
    macd_slow_period, macd_signal_period, macd_timeframe, volatility_period, \
    volatility_timeframe, volatility_adjustment, profit_target, trailing_stop_delta, \
    sell_offset, last_executed_at, next_execution_at, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, external_id, pair, side, amount, price, fees, status, \
    strategy_id, cycle_id, created_at, updated_at";

const CYCLE_COLUMNS: &str = "id, strategy_id, buy_order_id, sell_order_id, target_price, \
    max_price, created_at, updated_at";

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

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

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new();
        if url.contains(":memory:") {
            // Every connection to `:memory:` is a separate database.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;
        let store = Self::new(pool);
        store.migrate().await?;
        info!(url, "Database ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_cycle_rows(&self, sql: &str, id: i64) -> Result<Vec<CycleRow>> {
        let rows = sqlx::query(sql).bind(id).fetch_all(&self.pool).await?;
        rows.iter().map(cycle_row).collect()
    }

    async fn join(&self, row: CycleRow) -> Result<Cycle> {
        let buy_order = self
            .get_order(row.buy_order_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("buy order {}", row.buy_order_id)))?;
        let sell_order = match row.sell_order_id {
            Some(id) => Some(
                self.get_order(id)
                    .await?
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

    async fn cycles_for_strategy(
        &self,
        strategy_id: i64,
        keep: impl Fn(CycleStatus) -> bool,
    ) -> Result<Vec<Cycle>> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM cycles WHERE strategy_id = ?1 ORDER BY id");
        let mut cycles = Vec::new();
        for row in self.fetch_cycle_rows(&sql, strategy_id).await? {
            let cycle = self.join(row).await?;
            if keep(cycle.status()) {
                cycles.push(cycle);
            }
        }
        Ok(cycles)
    }

    async fn cycle_exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM cycles WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

fn ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad timestamp '{raw}': {e}")))
}

fn opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(ts).transpose()
}

fn strategy_row(row: &SqliteRow) -> Result<Strategy> {
    Ok(Strategy {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        enabled: row.try_get("enabled")?,
        algorithm: row.try_get("algorithm")?,
        cron_expression: row.try_get("cron_expression")?,
        quote_amount: row.try_get("quote_amount")?,
        max_concurrent_orders: row.try_get("max_concurrent_orders")?,
        rsi_threshold: row.try_get("rsi_threshold")?,
        rsi_period: row.try_get("rsi_period")?,
        rsi_timeframe: row.try_get("rsi_timeframe")?,
        macd_fast_period: row.try_get("macd_fast_period")?,
        macd_slow_period: row.try_get("macd_slow_period")?,
        macd_signal_period: row.try_get("macd_signal_period")?,
        macd_timeframe: row.try_get("macd_timeframe")?,
        volatility_period: row.try_get("volatility_period")?,
        volatility_timeframe: row.try_get("volatility_timeframe")?,
        volatility_adjustment: row.try_get("volatility_adjustment")?,
        profit_target: row.try_get("profit_target")?,
        trailing_stop_delta: row.try_get("trailing_stop_delta")?,
        sell_offset: row.try_get("sell_offset")?,
        last_executed_at: opt_ts(row.try_get("last_executed_at")?)?,
        next_execution_at: opt_ts(row.try_get("next_execution_at")?)?,
        created_at: ts(row.try_get::<&str, _>("created_at")?)?,
        updated_at: ts(row.try_get::<&str, _>("updated_at")?)?,
    })
}

fn order_row(row: &SqliteRow) -> Result<Order> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        pair: row.try_get("pair")?,
        side: OrderSide::parse(&side)
            .ok_or_else(|| Error::Other(format!("unknown order side '{side}'")))?,
        amount: row.try_get("amount")?,
        price: row.try_get("price")?,
        fees: row.try_get("fees")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| Error::Other(format!("unknown order status '{status}'")))?,
        strategy_id: row.try_get("strategy_id")?,
        cycle_id: row.try_get("cycle_id")?,
        created_at: ts(row.try_get::<&str, _>("created_at")?)?,
        updated_at: ts(row.try_get::<&str, _>("updated_at")?)?,
    })
}

fn cycle_row(row: &SqliteRow) -> Result<CycleRow> {
    Ok(CycleRow {
        id: row.try_get("id")?,
        strategy_id: row.try_get("strategy_id")?,
        buy_order_id: row.try_get("buy_order_id")?,
        sell_order_id: row.try_get("sell_order_id")?,
        target_price: row.try_get("target_price")?,
        max_price: row.try_get("max_price")?,
        created_at: ts(row.try_get::<&str, _>("created_at")?)?,
        updated_at: ts(row.try_get::<&str, _>("updated_at")?)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_strategy(&self, new: NewStrategy) -> Result<Strategy> {
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            r#"
            INSERT INTO strategies (
                name, enabled, algorithm, cron_expression, quote_amount, max_concurrent_orders,
                rsi_threshold, rsi_period, rsi_timeframe,
                macd_fast_period, macd_slow_period, macd_signal_period, macd_timeframe,
                volatility_period, volatility_timeframe, volatility_adjustment,
                profit_target, trailing_stop_delta, sell_offset,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)
            "#,
        )
        .bind(&new.name)
        .bind(new.enabled)
        .bind(&new.algorithm)
        .bind(&new.cron_expression)
        .bind(new.quote_amount)
        .bind(new.max_concurrent_orders)
        .bind(new.rsi_threshold)
        .bind(new.rsi_period)
        .bind(&new.rsi_timeframe)
        .bind(new.macd_fast_period)
        .bind(new.macd_slow_period)
        .bind(new.macd_signal_period)
        .bind(&new.macd_timeframe)
        .bind(new.volatility_period)
        .bind(&new.volatility_timeframe)
        .bind(new.volatility_adjustment)
        .bind(new.profit_target)
        .bind(new.trailing_stop_delta)
        .bind(new.sell_offset)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_strategy(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("strategy {id}")))
    }

    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?1");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(strategy_row)
            .transpose()
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(strategy_row).collect()
    }

    async fn get_enabled_strategies(&self) -> Result<Vec<Strategy>> {
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE enabled = 1 ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(strategy_row).collect()
    }

    async fn set_strategy_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let done = sqlx::query("UPDATE strategies SET enabled = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(enabled)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("strategy {id}")));
        }
        Ok(())
    }

    async fn update_strategy_execution(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query(
            "UPDATE strategies SET last_executed_at = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("strategy {id}")));
        }
        Ok(())
    }

    async fn update_strategy_next_execution(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query(
            "UPDATE strategies SET next_execution_at = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("strategy {id}")));
        }
        Ok(())
    }

    async fn create_order(&self, new: NewOrder) -> Result<Order> {
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            r#"
            INSERT INTO orders (external_id, pair, side, amount, price, fees, status, strategy_id, cycle_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, 'pending', ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&new.external_id)
        .bind(&new.pair)
        .bind(new.side.as_str())
        .bind(new.amount)
        .bind(new.price)
        .bind(new.strategy_id)
        .bind(new.cycle_id)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_order(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {id}")))
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(order_row)
            .transpose()
    }

    async fn get_pending_orders(&self) -> Result<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'pending' ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(order_row).collect()
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
        price: f64,
        fees: f64,
    ) -> Result<()> {
        let done = sqlx::query(
            "UPDATE orders SET status = ?1, price = ?2, fees = ?3, updated_at = ?4 WHERE id = ?5",
        )
        .bind(status.as_str())
        .bind(price)
        .bind(fees)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("order {id}")));
        }
        Ok(())
    }

    async fn count_active_orders_for_strategy(&self, strategy_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE strategy_id = ?1 AND status = 'pending'",
        )
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn create_cycle(&self, new: NewCycle) -> Result<Cycle> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            r#"
            INSERT INTO cycles (strategy_id, buy_order_id, sell_order_id, target_price, max_price, created_at, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(new.strategy_id)
        .bind(new.buy_order_id)
        .bind(new.target_price)
        .bind(new.max_price)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let linked = sqlx::query("UPDATE orders SET cycle_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(id)
            .bind(&now)
            .bind(new.buy_order_id)
            .execute(&mut *tx)
            .await?;
        if linked.rows_affected() == 0 {
            return Err(Error::NotFound(format!("buy order {}", new.buy_order_id)));
        }
        tx.commit().await?;

        self.get_cycle(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cycle {id}")))
    }

    async fn get_cycle(&self, id: i64) -> Result<Option<Cycle>> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM cycles WHERE id = ?1");
        match self.fetch_cycle_rows(&sql, id).await?.pop() {
            Some(row) => Ok(Some(self.join(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_cycle_by_buy_order(&self, buy_order_id: i64) -> Result<Option<Cycle>> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM cycles WHERE buy_order_id = ?1");
        match self.fetch_cycle_rows(&sql, buy_order_id).await?.pop() {
            Some(row) => Ok(Some(self.join(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_open_cycles_for_strategy(&self, strategy_id: i64) -> Result<Vec<Cycle>> {
        self.cycles_for_strategy(strategy_id, |s| s != CycleStatus::Completed)
            .await
    }

    async fn get_completed_cycles_for_strategy(&self, strategy_id: i64) -> Result<Vec<Cycle>> {
        self.cycles_for_strategy(strategy_id, |s| s == CycleStatus::Completed)
            .await
    }

    async fn update_cycle_max_price(&self, id: i64, price: f64) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE cycles SET max_price = ?1, updated_at = ?2 WHERE id = ?3 AND max_price < ?1",
        )
        .bind(price)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.cycle_exists(id).await? {
            return Err(Error::NotFound(format!("cycle {id}")));
        }
        Ok(false)
    }

    async fn update_cycle_target_price(&self, id: i64, price: f64) -> Result<()> {
        let done = sqlx::query("UPDATE cycles SET target_price = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(price)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("cycle {id}")));
        }
        Ok(())
    }

    async fn update_cycle_sell_order(&self, id: i64, sell_order_id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let attached = sqlx::query(
            "UPDATE cycles SET sell_order_id = ?1, updated_at = ?2 WHERE id = ?3 AND sell_order_id IS NULL",
        )
        .bind(sell_order_id)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if attached.rows_affected() == 0 {
            tx.rollback().await?;
            if !self.cycle_exists(id).await? {
                return Err(Error::NotFound(format!("cycle {id}")));
            }
            return Ok(false);
        }
        sqlx::query("UPDATE orders SET cycle_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(id)
            .bind(&now)
            .bind(sell_order_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_cycle(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE orders SET cycle_id = NULL WHERE cycle_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM cycles WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("cycle {id}")));
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::rsi_strategy;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn buy(strategy_id: i64, external_id: &str) -> NewOrder {
        NewOrder {
            external_id: external_id.into(),
            pair: "BTCUSDT".into(),
            side: OrderSide::Buy,
            amount: 0.5,
            price: 100.0,
            strategy_id,
            cycle_id: None,
        }
    }

    async fn cycle_for(store: &SqliteStore, strategy_id: i64, external_id: &str) -> Cycle {
        let order = store.create_order(buy(strategy_id, external_id)).await.unwrap();
        store
            .create_cycle(NewCycle {
                strategy_id,
                buy_order_id: order.id,
                target_price: 102.0,
                max_price: 100.0,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn strategy_round_trips_every_column() {
        let store = store().await;
        let mut new = rsi_strategy();
        new.volatility_period = Some(20);
        new.volatility_timeframe = Some("4h".into());
        new.volatility_adjustment = Some(50.0);
        let created = store.create_strategy(new.clone()).await.unwrap();

        assert_eq!(created.name, new.name);
        assert_eq!(created.rsi_period, Some(14));
        assert_eq!(created.volatility_adjustment, Some(50.0));
        assert_eq!(created.macd_fast_period, None);
        assert!(created.last_executed_at.is_none());

        let at = Utc::now();
        store.update_strategy_execution(created.id, at).await.unwrap();
        store.update_strategy_next_execution(created.id, at).await.unwrap();
        let loaded = store.get_strategy(created.id).await.unwrap().unwrap();
        assert_eq!(
            loaded.last_executed_at.map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );
        assert_eq!(loaded.next_execution_at, loaded.last_executed_at);
    }

    #[tokio::test]
    async fn enabled_filter_and_missing_strategy() {
        let store = store().await;
        let a = store.create_strategy(rsi_strategy()).await.unwrap();
        store.create_strategy(rsi_strategy()).await.unwrap();
        store.set_strategy_enabled(a.id, false).await.unwrap();

        assert_eq!(store.list_strategies().await.unwrap().len(), 2);
        assert_eq!(store.get_enabled_strategies().await.unwrap().len(), 1);
        assert!(store.get_strategy(999).await.unwrap().is_none());
        assert!(matches!(
            store.set_strategy_enabled(999, true).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cycle_status_follows_its_orders() {
        let store = store().await;
        let s = store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = cycle_for(&store, s.id, "b1").await;
        assert_eq!(cycle.status(), CycleStatus::New);
        assert_eq!(cycle.buy_order.cycle_id, Some(cycle.id));

        store
            .update_order_status(cycle.buy_order.id, OrderStatus::Filled, 99.5, 0.05)
            .await
            .unwrap();
        let mut sell = buy(s.id, "s1");
        sell.side = OrderSide::Sell;
        sell.price = 103.0;
        let sell = store.create_order(sell).await.unwrap();
        assert!(store.update_cycle_sell_order(cycle.id, sell.id).await.unwrap());
        assert_eq!(
            store.get_cycle(cycle.id).await.unwrap().unwrap().status(),
            CycleStatus::Running
        );

        store
            .update_order_status(sell.id, OrderStatus::Filled, 103.0, 0.05)
            .await
            .unwrap();
        let done = store.get_cycle(cycle.id).await.unwrap().unwrap();
        assert_eq!(done.status(), CycleStatus::Completed);
        assert!((done.profit().unwrap() - (3.5 * 0.5 - 0.1)).abs() < 1e-9);
        assert!(store.get_open_cycles_for_strategy(s.id).await.unwrap().is_empty());
        assert_eq!(store.get_completed_cycles_for_strategy(s.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sell_order_attaches_only_once() {
        let store = store().await;
        let s = store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = cycle_for(&store, s.id, "b1").await;
        let s1 = store.create_order(buy(s.id, "s1")).await.unwrap();
        let s2 = store.create_order(buy(s.id, "s2")).await.unwrap();

        assert!(store.update_cycle_sell_order(cycle.id, s1.id).await.unwrap());
        assert!(!store.update_cycle_sell_order(cycle.id, s2.id).await.unwrap());
        assert_eq!(store.get_order(s1.id).await.unwrap().unwrap().cycle_id, Some(cycle.id));
        assert_eq!(store.get_order(s2.id).await.unwrap().unwrap().cycle_id, None);
    }

    #[tokio::test]
    async fn max_price_only_rises() {
        let store = store().await;
        let s = store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = cycle_for(&store, s.id, "b1").await;

        assert!(store.update_cycle_max_price(cycle.id, 110.0).await.unwrap());
        assert!(!store.update_cycle_max_price(cycle.id, 105.0).await.unwrap());
        assert_eq!(store.get_cycle(cycle.id).await.unwrap().unwrap().max_price, 110.0);
        assert!(matches!(
            store.update_cycle_max_price(999, 1.0).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_external_id_is_rejected() {
        let store = store().await;
        let s = store.create_strategy(rsi_strategy()).await.unwrap();
        store.create_order(buy(s.id, "dup")).await.unwrap();
        assert!(matches!(
            store.create_order(buy(s.id, "dup")).await,
            Err(Error::Database(_))
        ));
    }

    #[tokio::test]
    async fn pending_orders_and_active_count() {
        let store = store().await;
        let s = store.create_strategy(rsi_strategy()).await.unwrap();
        let a = store.create_order(buy(s.id, "a")).await.unwrap();
        store.create_order(buy(s.id, "b")).await.unwrap();
        store
            .update_order_status(a.id, OrderStatus::Cancelled, 100.0, 0.0)
            .await
            .unwrap();

        assert_eq!(store.count_active_orders_for_strategy(s.id).await.unwrap(), 1);
        let pending = store.get_pending_orders().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].external_id, "b");
    }

    #[tokio::test]
    async fn deleting_a_cycle_unlinks_its_orders() {
        let store = store().await;
        let s = store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = cycle_for(&store, s.id, "b1").await;

        store.delete_cycle(cycle.id).await.unwrap();
        assert!(store.get_cycle(cycle.id).await.unwrap().is_none());
        assert!(store.get_cycle_by_buy_order(cycle.buy_order.id).await.unwrap().is_none());
        let order = store.get_order(cycle.buy_order.id).await.unwrap().unwrap();
        assert_eq!(order.cycle_id, None);
        assert!(matches!(store.delete_cycle(cycle.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn target_price_updates() {
        let store = store().await;
        let s = store.create_strategy(rsi_strategy()).await.unwrap();
        let cycle = cycle_for(&store, s.id, "b1").await;
        store.update_cycle_target_price(cycle.id, 101.37).await.unwrap();
        assert_eq!(store.get_cycle(cycle.id).await.unwrap().unwrap().target_price, 101.37);
    }
}
