use std::time::Duration;

use crate::TradingMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (required in live mode only)
    pub binance_api_key: String,
    pub binance_secret: String,

    // Market
    pub trading_pair: String,
    pub quote_asset: String,

    // Telegram (alerts and operator commands are disabled when unset)
    pub telegram_token: Option<String>,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Admin API
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_quote_balance: f64,
    pub paper_fee_rate: f64,

    // Engine timing
    pub order_check_interval: Duration,
    pub retry_base_delay: Duration,

    // Database
    pub database_url: String,

    // Strategy seed file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live => (required_env("BINANCE_API_KEY"), required_env("BINANCE_SECRET")),
            TradingMode::Paper => (
                optional_env("BINANCE_API_KEY").unwrap_or_default(),
                optional_env("BINANCE_SECRET").unwrap_or_default(),
            ),
        };

        let telegram_allowed_user_ids = optional_env("TELEGRAM_ALLOWED_USER_IDS")
            .map(|ids| parse_user_ids(&ids))
            .unwrap_or_default();

        Config {
            binance_api_key,
            binance_secret,
            trading_pair: optional_env("TRADING_PAIR").unwrap_or_else(|| "BTCUSDT".to_string()),
            quote_asset: optional_env("QUOTE_ASSET").unwrap_or_else(|| "USDT".to_string()),
            telegram_token: optional_env("TELEGRAM_TOKEN").filter(|t| !t.is_empty()),
            telegram_allowed_user_ids,
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: parsed_env("DASHBOARD_PORT").unwrap_or(8080),
            trading_mode,
            paper_quote_balance: parsed_env("PAPER_QUOTE_BALANCE").unwrap_or(1_000.0),
            paper_fee_rate: parsed_env("PAPER_FEE_RATE").unwrap_or(0.001),
            order_check_interval: Duration::from_secs(
                parsed_env("ORDER_CHECK_INTERVAL_SECS").unwrap_or(30),
            ),
            retry_base_delay: Duration::from_millis(
                parsed_env("RETRY_BASE_DELAY_MS").unwrap_or(500),
            ),
            database_url: required_env("DATABASE_URL"),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
        }
    }
}

fn parse_user_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim().parse::<i64>().unwrap_or_else(|_| {
                panic!(
                    "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{}'",
                    s.trim()
                )
            })
        })
        .collect()
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    optional_env(key).and_then(|v| v.parse().ok())
}
