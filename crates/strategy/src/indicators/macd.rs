/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), signal = EMA(macd_line, signal_period),
/// histogram = MACD − signal.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Latest two histogram values plus the current lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValues {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_histogram: f64,
}

impl MacdValues {
    /// MACD crossed above its signal line on the latest bar.
    pub fn crossed_up(&self) -> bool {
        self.prev_histogram <= 0.0 && self.histogram > 0.0
    }
}

impl MacdIndicator {
    /// `None` unless `0 < fast < slow` and `signal > 0`.
    pub fn new(fast: usize, slow: usize, signal: usize) -> Option<Self> {
        (fast > 0 && fast < slow && signal > 0).then_some(Self { fast, slow, signal })
    }

    /// Closes needed for one reading.
    pub fn min_len(&self) -> usize {
        self.slow + self.signal
    }

    /// Compute from close prices (oldest first). `None` with fewer than
    /// `slow + signal` values.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdValues> {
        if closes.len() < self.min_len() {
            return None;
        }

        let fast_ema = ema_series(closes, self.fast);
        let slow_ema = ema_series(closes, self.slow);
        // fast_ema[i + offset] and slow_ema[i] end on the same close.
        let offset = self.slow - self.fast;
        let macd_line: Vec<f64> = slow_ema
            .iter()
            .enumerate()
            .map(|(i, slow)| fast_ema[i + offset] - slow)
            .collect();

        let signal_line = ema_series(&macd_line, self.signal);
        if signal_line.len() < 2 {
            return None;
        }

        let n = macd_line.len();
        let m = signal_line.len();
        let histogram = macd_line[n - 1] - signal_line[m - 1];
        let prev_histogram = macd_line[n - 2] - signal_line[m - 2];

        Some(MacdValues {
            macd: macd_line[n - 1],
            signal: signal_line[m - 1],
            histogram,
            prev_histogram,
        })
    }
}

/// EMA over `data`, seeded with the SMA of the first `period` values.
/// Element `k` of the result ends on `data[period - 1 + k]`.
fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut value = data[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(data.len() - period + 1);
    out.push(value);
    for &price in &data[period..] {
        value = price * k + value * (1.0 - k);
        out.push(value);
    }
    out
}
