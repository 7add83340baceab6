use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Config, ExchangeGateway, Result, Store, TradeEvent, TradingMode};
use engine::{
    BinanceClient, OrderMonitor, RetryPolicy, RetryingGateway, SqliteStore, StrategyManager,
    StrategyScheduler,
};
use paper::PaperExchange;
use risk::ResourceManager;
use strategy::{AlgorithmRegistry, CandleIndicators, StrategyFileConfig};
use telegram_ctrl::{forward_events, start_bot, BotDeps};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, pair = %cfg.trading_pair, "CycleBot starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&cfg.database_url)
            .await
            .unwrap_or_else(|e| panic!("Failed to open database: {e}")),
    );

    match seed_strategies(store.as_ref(), &cfg.strategy_config_path).await {
        Ok(0) => {}
        Ok(n) => info!(count = n, path = %cfg.strategy_config_path, "Seeded strategies"),
        Err(e) => panic!("Failed to seed strategies: {e}"),
    }

    // ── Exchange gateway (injected based on TRADING_MODE) ─────────────────────
    let binance = BinanceClient::new(&cfg.binance_api_key, &cfg.binance_secret)
        .unwrap_or_else(|e| panic!("Failed to build Binance client: {e}"));
    let raw: Arc<dyn ExchangeGateway> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode: orders go to Binance");
            Arc::new(binance)
        }
        TradingMode::Paper => {
            let base = base_asset(&cfg.trading_pair, &cfg.quote_asset);
            info!(
                balance = cfg.paper_quote_balance,
                fee_rate = cfg.paper_fee_rate,
                "Paper trading mode: simulated fills on live prices"
            );
            Arc::new(PaperExchange::new(
                Arc::new(binance),
                base,
                cfg.quote_asset.clone(),
                cfg.paper_quote_balance,
                cfg.paper_fee_rate,
            ))
        }
    };
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(RetryingGateway::new(
        raw,
        RetryPolicy::with_base_delay(cfg.retry_base_delay),
    ));

    // ── Engine ────────────────────────────────────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<TradeEvent>(256);
    let registry = Arc::new(AlgorithmRegistry::new(Arc::new(CandleIndicators::new(
        gateway.clone(),
    ))));
    let resources = Arc::new(ResourceManager::new(gateway.clone(), cfg.quote_asset.clone()));
    let manager = Arc::new(
        StrategyManager::new(
            store.clone(),
            gateway.clone(),
            registry,
            resources,
            cfg.trading_pair.clone(),
        )
        .with_events(event_tx.clone()),
    );
    let scheduler = Arc::new(StrategyScheduler::new(store.clone(), manager.clone()));
    let scheduled = scheduler
        .start()
        .await
        .unwrap_or_else(|e| panic!("Failed to start scheduler: {e}"));
    info!(scheduled, "Scheduler started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = OrderMonitor::new(store.clone(), gateway, manager, cfg.order_check_interval)
        .with_events(event_tx);
    let monitor_task = tokio::spawn(monitor.run(shutdown_rx));

    // ── Telegram ──────────────────────────────────────────────────────────────
    let mut bot_task = None;
    match cfg.telegram_token.clone() {
        Some(token) => {
            let bot = teloxide::Bot::new(token);
            let chat_ids = cfg
                .telegram_allowed_user_ids
                .iter()
                .map(|&id| teloxide::types::ChatId(id))
                .collect();
            tokio::spawn(forward_events(bot.clone(), chat_ids, event_rx));
            let deps = BotDeps {
                scheduler: scheduler.clone(),
                store: store.clone(),
                trading_mode: cfg.trading_mode,
                pair: cfg.trading_pair.clone(),
                allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
            };
            bot_task = Some(tokio::spawn(start_bot(bot, deps)));
        }
        None => {
            info!("TELEGRAM_TOKEN not set, trade events go to the log only");
            tokio::spawn(log_events(event_rx));
        }
    }

    // ── Admin API ─────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        scheduler: scheduler.clone(),
        store,
        trading_mode: cfg.trading_mode,
        pair: cfg.trading_pair.clone(),
        dashboard_token: cfg.dashboard_token.clone(),
    };
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Admin API stopped");
        }
    });

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received. Stopping.");

    let _ = shutdown_tx.send(true);
    scheduler.stop().await;
    if let Err(e) = monitor_task.await {
        error!(error = %e, "Order monitor task failed");
    }
    if let Some(task) = bot_task {
        task.abort();
    }
    info!("Stopped.");
}

/// Insert the strategies from the seed file, but only into an empty store so
/// edits made through the API survive restarts.
async fn seed_strategies(store: &dyn Store, path: &str) -> Result<usize> {
    if !store.list_strategies().await?.is_empty() {
        return Ok(0);
    }
    let file = StrategyFileConfig::load(path)?;
    let count = file.strategies.len();
    for seed in file.strategies {
        let created = store.create_strategy(seed.into()).await?;
        info!(strategy_id = created.id, name = %created.name, algorithm = %created.algorithm, "Strategy seeded");
    }
    Ok(count)
}

async fn log_events(mut events: mpsc::Receiver<TradeEvent>) {
    while let Some(event) = events.recv().await {
        info!(%event, "Trade event");
    }
}

/// `BTCUSDT` with quote `USDT` is `BTC`.
fn base_asset(pair: &str, quote: &str) -> String {
    pair.strip_suffix(quote).unwrap_or(pair).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MemoryStore;

    fn write_seed(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("cyclebot-seed-{name}-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[[strategy]]
name = "dip buyer"
algorithm = "rsi_dca"
cron_expression = "*/5 * * * *"
quote_amount = 50.0
rsi_threshold = 35.0
rsi_period = 14
rsi_timeframe = "1h"
profit_target = 2.0
"#,
        )
        .unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn seeds_only_an_empty_store() {
        let path = write_seed("once");
        let store = MemoryStore::new();
        assert_eq!(seed_strategies(&store, &path).await.unwrap(), 1);
        assert_eq!(seed_strategies(&store, &path).await.unwrap(), 0);
        assert_eq!(store.list_strategies().await.unwrap().len(), 1);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_seed_file_is_not_an_error() {
        let store = MemoryStore::new();
        assert_eq!(seed_strategies(&store, "/nonexistent/strategies.toml").await.unwrap(), 0);
    }

    #[test]
    fn base_asset_strips_quote() {
        assert_eq!(base_asset("BTCUSDT", "USDT"), "BTC");
        assert_eq!(base_asset("ETHBTC", "USDT"), "ETHBTC");
    }
}
