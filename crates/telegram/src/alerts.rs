use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::TradeEvent;

/// Send a proactive alert to all configured chat IDs.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}

/// Relay engine events to Telegram until the sender side closes.
pub async fn forward_events(bot: Bot, chat_ids: Vec<ChatId>, mut events: mpsc::Receiver<TradeEvent>) {
    while let Some(event) = events.recv().await {
        send_alert(&bot, &chat_ids, &alert_text(&event)).await;
    }
    info!("Trade event channel closed, alert forwarder exiting");
}

pub(crate) fn alert_text(event: &TradeEvent) -> String {
    match event {
        TradeEvent::OrderCancelled { .. } | TradeEvent::ExecutionFailed { .. } => {
            format!("\u{26a0}\u{fe0f} {event}")
        }
        TradeEvent::CycleCompleted { profit, .. } if *profit < 0.0 => format!("\u{1f4c9} {event}"),
        TradeEvent::CycleCompleted { .. } => format!("\u{1f4b0} {event}"),
        _ => event.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderSide;

    #[test]
    fn problems_are_flagged() {
        let text = alert_text(&TradeEvent::OrderCancelled {
            strategy_id: 1,
            order_id: 9,
            side: OrderSide::Sell,
        });
        assert!(text.starts_with('\u{26a0}'));
        assert!(text.contains("SELL order 9 was cancelled"));
    }

    #[test]
    fn completed_cycle_reports_profit() {
        let text = alert_text(&TradeEvent::CycleCompleted { strategy_id: 1, cycle_id: 3, profit: 4.25 });
        assert!(text.contains("cycle 3 completed, profit 4.2500"));

        let plain = alert_text(&TradeEvent::BuyPlaced {
            strategy_id: 1,
            cycle_id: 3,
            price: 99.5,
            amount: 0.5,
        });
        assert_eq!(plain, "Strategy 1: buy placed for cycle 3, 0.5 @ 99.5");
    }
}
