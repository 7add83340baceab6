//! Exit rule shared by every algorithm: wait for the target, then trail the high.

use common::{Cycle, CycleStatus, Error, Result, Strategy};

use crate::{SellSignal, TradingContext};

/// Decide whether an open cycle should be sold at the current price.
///
/// Nothing happens below `cycle.target_price`. Above it, the sell fires once
/// price retraces below `high × (1 − trailing_stop_delta%)`, where `high` is
/// the cycle's max price including the current tick. Without a trailing
/// delta the sell fires as soon as the target is reached.
pub fn trailing_stop_signal(ctx: &TradingContext, cycle: &Cycle, strategy: &Strategy) -> SellSignal {
    if cycle.status() != CycleStatus::Open {
        return SellSignal::hold(format!("cycle is {}", cycle.status()));
    }

    let price = ctx.price;
    if price < cycle.target_price {
        return SellSignal::hold(format!(
            "price {price} below target {}",
            cycle.target_price
        ));
    }

    let offset = strategy.sell_offset.unwrap_or(0.0) / 100.0;
    let limit_price = ctx.precision.round_price(price * (1.0 + offset));

    let delta = strategy.trailing_stop_delta.unwrap_or(0.0);
    if delta <= 0.0 {
        return SellSignal::sell(limit_price, format!("target {} reached", cycle.target_price));
    }

    let high = cycle.max_price.max(price);
    let stop = high * (1.0 - delta / 100.0);
    if price < stop {
        SellSignal::sell(
            limit_price,
            format!("price {price} retraced below trailing stop {stop:.4} (high {high})"),
        )
    } else {
        SellSignal::hold(format!("trailing above stop {stop:.4} (high {high})"))
    }
}

/// Checks shared by all algorithms.
pub(crate) fn validate_common(strategy: &Strategy) -> Result<()> {
    if strategy.quote_amount <= 0.0 {
        return Err(Error::Config(format!(
            "strategy {}: quote_amount must be positive",
            strategy.id
        )));
    }
    if strategy.max_concurrent_orders < 1 {
        return Err(Error::Config(format!(
            "strategy {}: max_concurrent_orders must be at least 1",
            strategy.id
        )));
    }
    if strategy.profit_target <= 0.0 {
        return Err(Error::Config(format!(
            "strategy {}: profit_target must be positive",
            strategy.id
        )));
    }
    if let Some(delta) = strategy.trailing_stop_delta {
        if !(0.0..100.0).contains(&delta) {
            return Err(Error::Config(format!(
                "strategy {}: trailing_stop_delta must be in [0, 100)",
                strategy.id
            )));
        }
    }
    if let Some(offset) = strategy.sell_offset {
        if offset <= -100.0 {
            return Err(Error::Config(format!(
                "strategy {}: sell_offset must be greater than -100",
                strategy.id
            )));
        }
    }
    Ok(())
}
