use serde::{Deserialize, Serialize};

/// Relative tolerance used to absorb binary floating-point noise when a
/// scaled value is already an integer (e.g. `1.1 * 100.0 == 110.00000000000001`).
const SNAP_EPSILON: f64 = 1e-12;

/// Price/amount precision of a market, as decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketPrecision {
    pub price_decimals: u32,
    pub amount_decimals: u32,
    /// Minimum order value in quote currency. `0.0` when the market has none.
    pub min_notional: f64,
}

impl Default for MarketPrecision {
    fn default() -> Self {
        Self {
            price_decimals: 2,
            amount_decimals: 6,
            min_notional: 0.0,
        }
    }
}

impl MarketPrecision {
    /// Round a price to the nearest tick.
    pub fn round_price(&self, price: f64) -> f64 {
        round_nearest(price, self.price_decimals)
    }

    /// Round an amount up to the next lot step, so an order never falls short
    /// of the notional it was sized for.
    pub fn round_amount_up(&self, amount: f64) -> f64 {
        round_up(amount, self.amount_decimals)
    }

    /// Amount to buy for `quote` at `price`, rounded up and raised to meet the
    /// minimum notional.
    pub fn amount_for_quote(&self, quote: f64, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        let mut amount = self.round_amount_up(quote / price);
        if self.min_notional > 0.0 && amount * price < self.min_notional {
            amount = self.round_amount_up(self.min_notional / price);
        }
        amount
    }

    /// Decimal places implied by a step string such as `"0.01000000"`.
    pub fn decimals_from_step(step: &str) -> u32 {
        let trimmed = step.trim_end_matches('0');
        match trimmed.split_once('.') {
            Some((_, frac)) => frac.len() as u32,
            None => 0,
        }
    }
}

fn scale(decimals: u32) -> f64 {
    10f64.powi(decimals as i32)
}

fn snapped(scaled: f64) -> Option<f64> {
    let nearest = scaled.round();
    if (scaled - nearest).abs() <= SNAP_EPSILON * nearest.abs().max(1.0) {
        Some(nearest)
    } else {
        None
    }
}

pub fn round_nearest(value: f64, decimals: u32) -> f64 {
    let factor = scale(decimals);
    (value * factor).round() / factor
}

pub fn round_up(value: f64, decimals: u32) -> f64 {
    let factor = scale(decimals);
    let scaled = value * factor;
    snapped(scaled).unwrap_or_else(|| scaled.ceil()) / factor
}

pub fn round_down(value: f64, decimals: u32) -> f64 {
    let factor = scale(decimals);
    let scaled = value * factor;
    snapped(scaled).unwrap_or_else(|| scaled.floor()) / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_rounds_up() {
        let p = MarketPrecision { price_decimals: 2, amount_decimals: 3, min_notional: 0.0 };
        assert_eq!(p.round_amount_up(0.1231), 0.124);
        assert_eq!(p.round_amount_up(0.123), 0.123);
    }

    #[test]
    fn exact_values_are_not_bumped_by_float_noise() {
        assert_eq!(round_up(1.1, 2), 1.1);
        assert_eq!(round_up(0.57, 2), 0.57);
        assert_eq!(round_down(0.29, 2), 0.29);
    }

    #[test]
    fn price_rounds_to_nearest_tick() {
        let p = MarketPrecision { price_decimals: 1, amount_decimals: 3, min_notional: 0.0 };
        assert_eq!(p.round_price(101.96), 102.0);
        assert_eq!(p.round_price(101.94), 101.9);
    }

    #[test]
    fn amount_for_quote_meets_min_notional() {
        let p = MarketPrecision { price_decimals: 2, amount_decimals: 3, min_notional: 10.0 };
        let amount = p.amount_for_quote(5.0, 100.0);
        assert!(amount * 100.0 >= 10.0, "amount {amount}");
        assert_eq!(amount, 0.1);
    }

    #[test]
    fn amount_for_quote_covers_quote() {
        let p = MarketPrecision { price_decimals: 2, amount_decimals: 5, min_notional: 0.0 };
        let amount = p.amount_for_quote(50.0, 61_234.56);
        assert!(amount * 61_234.56 >= 50.0);
    }

    #[test]
    fn decimals_from_step_strings() {
        assert_eq!(MarketPrecision::decimals_from_step("0.01000000"), 2);
        assert_eq!(MarketPrecision::decimals_from_step("0.00001000"), 5);
        assert_eq!(MarketPrecision::decimals_from_step("1.00000000"), 0);
        assert_eq!(MarketPrecision::decimals_from_step("1"), 0);
    }
}
