use chrono::Utc;
use proptest::prelude::*;

use common::{Cycle, MarketPrecision, NewStrategy, Order, OrderSide, OrderStatus};
use strategy::indicators::RsiIndicator;
use strategy::rsi_dca::{entry_offset_pct, profit_target_pct};
use strategy::trailing::trailing_stop_signal;
use strategy::TradingContext;

fn strategy(trailing: Option<f64>) -> common::Strategy {
    NewStrategy {
        name: "prop".into(),
        enabled: true,
        algorithm: "rsi_dca".into(),
        cron_expression: "*/5 * * * *".into(),
        quote_amount: 50.0,
        max_concurrent_orders: 1,
        rsi_threshold: Some(35.0),
        rsi_period: Some(14),
        rsi_timeframe: Some("1h".into()),
        macd_fast_period: None,
        macd_slow_period: None,
        macd_signal_period: None,
        macd_timeframe: None,
        volatility_period: None,
        volatility_timeframe: None,
        volatility_adjustment: None,
        profit_target: 2.0,
        trailing_stop_delta: trailing,
        sell_offset: None,
    }
    .into_strategy(1, Utc::now())
}

fn open_cycle(target: f64, max_price: f64) -> Cycle {
    let now = Utc::now();
    Cycle {
        id: 1,
        strategy_id: 1,
        buy_order: Order {
            id: 1,
            external_id: "b".into(),
            pair: "BTCUSDT".into(),
            side: OrderSide::Buy,
            amount: 1.0,
            price: target / 1.02,
            fees: 0.0,
            status: OrderStatus::Filled,
            strategy_id: 1,
            cycle_id: Some(1),
            created_at: now,
            updated_at: now,
        },
        sell_order: None,
        target_price: target,
        max_price,
        created_at: now,
        updated_at: now,
    }
}

proptest! {
    /// RSI stays within [0, 100] for any positive price series.
    #[test]
    fn rsi_is_bounded(closes in prop::collection::vec(1.0f64..100_000.0, 15..200)) {
        let rsi = RsiIndicator::new(14).unwrap().compute(&closes).unwrap();
        prop_assert!((0.0..=100.0).contains(&rsi), "rsi {rsi}");
    }

    /// A trailing stop never triggers a sell below the cycle's target.
    #[test]
    fn trailing_never_sells_below_target(
        target in 10.0f64..10_000.0,
        rally in 0.0f64..0.5,
        price_factor in 0.5f64..1.6,
        delta in prop::option::of(0.1f64..10.0),
    ) {
        let cycle = open_cycle(target, target * (1.0 + rally));
        let ctx = TradingContext {
            pair: "BTCUSDT".into(),
            price: target * price_factor,
            quote_balance: 1_000.0,
            open_cycles: Vec::new(),
            precision: MarketPrecision::default(),
        };
        let signal = trailing_stop_signal(&ctx, &cycle, &strategy(delta));
        if signal.should_sell {
            prop_assert!(ctx.price >= target);
        }
    }

    /// The profit target never drops under its floor and the entry offset
    /// stays between zero and half a percent.
    #[test]
    fn pricing_bounds(
        base in 0.0f64..20.0,
        vol in prop::option::of(0.0f64..50.0),
        adjustment in 0.0f64..100.0,
        rsi in 0.0f64..100.0,
        threshold in 1.0f64..100.0,
    ) {
        let pct = profit_target_pct(base, vol, adjustment);
        prop_assert!(pct >= 0.001);
        let offset = entry_offset_pct(rsi, threshold, pct);
        prop_assert!((0.0..=0.005).contains(&offset), "offset {offset}");
    }
}
