pub mod binance;
pub mod cron;
pub mod db;
pub mod manager;
pub mod monitor;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
mod testkit;

pub use binance::BinanceClient;
pub use cron::CronSchedule;
pub use db::SqliteStore;
pub use manager::{ExecutionReport, StrategyManager};
pub use monitor::{CheckSummary, OrderMonitor};
pub use retry::{RetryPolicy, RetryingGateway};
pub use scheduler::{JobInfo, StrategyScheduler};
