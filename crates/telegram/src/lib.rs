pub mod alerts;
pub mod commands;

pub use alerts::{forward_events, send_alert};
pub use commands::{start_bot, BotDeps, Command};
