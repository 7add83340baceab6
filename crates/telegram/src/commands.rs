use std::fmt::Write as _;
use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::{Store, Strategy, TradingMode};
use engine::{JobInfo, StrategyScheduler};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub scheduler: Arc<StrategyScheduler>,
    pub store: Arc<dyn Store>,
    pub trading_mode: TradingMode,
    pub pair: String,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "CycleBot commands:")]
pub enum Command {
    #[command(description = "Show this help")]
    Help,
    #[command(description = "Show mode, pair and scheduled jobs")]
    Status,
    #[command(description = "List strategies with their schedule")]
    Strategies,
    #[command(description = "Reload strategies from the database and reschedule")]
    Reload,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(handle_help))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Strategies].endpoint(handle_strategies))
        .branch(case![Command::Reload].endpoint(handle_reload));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let jobs = deps.scheduler.jobs().await;
    let strategies = deps.store.list_strategies().await?;
    let text = status_text(deps.trading_mode, &deps.pair, &strategies, &jobs);
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_strategies(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let jobs = deps.scheduler.jobs().await;
    let strategies = deps.store.list_strategies().await?;
    bot.send_message(msg.chat.id, strategies_text(&strategies, &jobs))
        .await?;
    Ok(())
}

async fn handle_reload(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.scheduler.reload().await {
        Ok(n) => {
            info!(scheduled = n, "Strategies reloaded via Telegram");
            format!("Reloaded. {n} strategies scheduled.")
        }
        Err(e) => {
            warn!(error = %e, "Telegram reload failed");
            format!("Reload failed: {e}")
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(crate) fn status_text(
    mode: TradingMode,
    pair: &str,
    strategies: &[Strategy],
    jobs: &[JobInfo],
) -> String {
    let enabled = strategies.iter().filter(|s| s.enabled).count();
    format!(
        "CycleBot Status\n\
         Mode: {mode}\n\
         Pair: {pair}\n\
         Strategies: {} ({enabled} enabled)\n\
         Scheduled jobs: {}",
        strategies.len(),
        jobs.len(),
    )
}

pub(crate) fn strategies_text(strategies: &[Strategy], jobs: &[JobInfo]) -> String {
    if strategies.is_empty() {
        return "No strategies configured.".to_string();
    }
    let mut out = String::new();
    for s in strategies {
        let state = if jobs.iter().any(|j| j.strategy_id == s.id) {
            "scheduled"
        } else if s.enabled {
            "enabled, not scheduled"
        } else {
            "disabled"
        };
        let last = s
            .last_executed_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(
            out,
            "#{} {} [{}] {}\n  cron: {} | last run: {last}",
            s.id, s.name, s.algorithm, state, s.cron_expression
        );
    }
    out
}
